//! C6: the optional statistics block.
//!
//! `EnableStats` is a `const bool` generic parameter on [`crate::pool::Pool`].
//! When it is `false` the block below is the zero-sized [`NoStats`] and every
//! call site monomorphizes to nothing; when `true` it is [`Counters`], nine
//! independently cache-line-isolated relaxed atomics. The dispatch is done
//! through [`StatsMode`], a const-generic-to-type mapping — the same kind of
//! compile-time selection the capability probes in [`crate::Poolable`] use,
//! just keyed on a `bool` instead of an trait method.
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time snapshot of a pool's counters.
///
/// Snapshots are not mutually consistent: each field is read independently
/// with relaxed ordering, so under concurrent activity `acquires ==
/// releases + in_use` may not hold exactly at the instant of the read (it
/// holds at quiescence — see the crate's property tests). When stats are
/// disabled every field is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde_derive::Serialize, serde_derive::Deserialize))]
pub struct Stats {
    pub acquires: u64,
    pub releases: u64,
    pub creates: u64,
    pub cross_thread_ops: u64,
    pub same_thread_hits: u64,
    pub in_use: u64,
    pub current_pool_size: u64,
    pub cache_hits: u64,
    pub batch_operations: u64,
}

pub(crate) trait StatsBlock: Default + Send + Sync {
    fn record_acquire(&self) {}
    fn record_release(&self) {}
    fn record_create(&self) {}
    fn record_cross_thread(&self) {}
    fn record_same_thread_hit(&self) {}
    fn record_cache_hit(&self) {}
    fn record_batch_op(&self, _n: u64) {}
    fn inc_in_use(&self) {}
    fn dec_in_use(&self) {}
    fn set_pool_size(&self, _n: u64) {}
    fn snapshot(&self) -> Stats {
        Stats::default()
    }
}

/// The zero-byte stats block used when `EnableStats = false`.
#[derive(Debug, Default)]
pub struct NoStats;

impl StatsBlock for NoStats {}

/// Nine relaxed-atomic counters, each on its own cache line to avoid false
/// sharing between counters that are bumped from different threads on the
/// hot path (`acquires`/`in_use` from the acquiring thread,
/// `cross_thread_ops` from whichever thread releases).
#[derive(Debug, Default)]
pub struct Counters {
    acquires: CachePadded<AtomicU64>,
    releases: CachePadded<AtomicU64>,
    creates: CachePadded<AtomicU64>,
    cross_thread_ops: CachePadded<AtomicU64>,
    same_thread_hits: CachePadded<AtomicU64>,
    in_use: CachePadded<AtomicU64>,
    current_pool_size: CachePadded<AtomicU64>,
    cache_hits: CachePadded<AtomicU64>,
    batch_operations: CachePadded<AtomicU64>,
}

impl StatsBlock for Counters {
    fn record_acquire(&self) {
        self.acquires.fetch_add(1, Ordering::Relaxed);
    }

    fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    fn record_create(&self) {
        self.creates.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cross_thread(&self) {
        self.cross_thread_ops.fetch_add(1, Ordering::Relaxed);
    }

    fn record_same_thread_hit(&self) {
        self.same_thread_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_batch_op(&self, n: u64) {
        self.batch_operations.fetch_add(n, Ordering::Relaxed);
    }

    fn inc_in_use(&self) {
        self.in_use.fetch_add(1, Ordering::Relaxed);
    }

    fn dec_in_use(&self) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }

    fn set_pool_size(&self, n: u64) {
        self.current_pool_size.store(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Stats {
        Stats {
            acquires: self.acquires.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            cross_thread_ops: self.cross_thread_ops.load(Ordering::Relaxed),
            same_thread_hits: self.same_thread_hits.load(Ordering::Relaxed),
            in_use: self.in_use.load(Ordering::Relaxed),
            current_pool_size: self.current_pool_size.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            batch_operations: self.batch_operations.load(Ordering::Relaxed),
        }
    }
}

/// Maps the `EnableStats` const generic to a concrete block type.
pub(crate) trait StatsMode {
    type Block: StatsBlock;
}

/// Marker carrying the `EnableStats` const generic so it can be used as a
/// type (a `bool` itself can't implement a trait with an associated type
/// keyed off its own value).
pub(crate) struct Mode<const STATS: bool>;

impl StatsMode for Mode<true> {
    type Block = Counters;
}

impl StatsMode for Mode<false> {
    type Block = NoStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_stats_is_zero_sized() {
        assert_eq!(std::mem::size_of::<NoStats>(), 0);
    }

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let c = Counters::default();
        c.record_acquire();
        c.inc_in_use();
        c.record_acquire();
        c.inc_in_use();
        c.record_release();
        c.dec_in_use();
        let snap = c.snapshot();
        assert_eq!(snap.acquires, 2);
        assert_eq!(snap.releases, 1);
        assert_eq!(snap.in_use, 1);
    }
}
