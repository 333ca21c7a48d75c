//! C4: the pool engine itself — fast/medium/slow acquire paths, release
//! routing, prewarm/shrink maintenance, and the shutdown sequence.
use crate::{
    alloc_adapter::{AllocAdapter, RawAllocator},
    config::PoolConfig,
    local_cache::{self, Destroyer},
    registry::{self, Rescuable},
    slot::Slot,
    stats::{Mode, Stats, StatsBlock, StatsMode},
    thread_id, Poolable, PoolError,
};
use crossbeam_queue::ArrayQueue;
use std::{
    ops::{Deref, DerefMut},
    ptr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Number of freshly constructed slots handled per prewarm/shrink
/// maintenance batch, and per shutdown drain batch.
const BATCH_SIZE: usize = 32;
const SHUTDOWN_DRAIN_BATCH: usize = 64;

struct PoolCore<T, const POOL_SIZE: usize, A, const STATS: bool>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
{
    id: u64,
    shutdown: AtomicBool,
    ring: ArrayQueue<Slot<T>>,
    adapter: AllocAdapter<T, A>,
    local_cache_size: usize,
    stats: <Mode<STATS> as StatsMode>::Block,
}

impl<T, const POOL_SIZE: usize, A, const STATS: bool> Rescuable<T> for PoolCore<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
{
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn try_rescue(&self, slot: Slot<T>) -> Result<(), Slot<T>> {
        let result = self.ring.push(slot);
        if result.is_ok() {
            self.stats.set_pool_size(self.ring.len() as u64);
        }
        result
    }

    fn note_cross_thread_rescue(&self) {
        self.stats.record_cross_thread();
    }
}

impl<T, const POOL_SIZE: usize, A, const STATS: bool> Destroyer<T> for PoolCore<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
{
    fn destroy(&self, slot: Slot<T>) {
        self.adapter.destroy_and_deallocate(slot.into_raw());
    }
}

/// A high-throughput, thread-safe pool of `T`.
///
/// `POOL_SIZE` (the global ring's fixed capacity) and `STATS` (whether the
/// statistics block exists at all) are compile-time const generics; the
/// local cache size and the allocator are configured at construction via
/// [`PoolConfig`].
pub struct Pool<T, const POOL_SIZE: usize, A = crate::alloc_adapter::GlobalAllocator, const STATS: bool = true>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
{
    core: Arc<PoolCore<T, POOL_SIZE, A, STATS>>,
}

impl<T, const POOL_SIZE: usize, A, const STATS: bool> Pool<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
    T::Args: Default + Send,
{
    const ASSERT_POOL_SIZE_IS_POWER_OF_TWO: () =
        assert!(POOL_SIZE > 0 && POOL_SIZE.is_power_of_two(), "PoolSize must be a nonzero power of two");

    /// Build a pool with the default allocator and local cache size.
    pub fn new(allocator: A) -> Self {
        Self::with_config(PoolConfig::new().with_allocator(allocator))
    }

    /// Build a pool from an explicit [`PoolConfig`].
    pub fn with_config(config: PoolConfig<A>) -> Self {
        let () = Self::ASSERT_POOL_SIZE_IS_POWER_OF_TWO;
        let (local_cache_size, allocator) = config.into_parts();
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let core = Arc::new(PoolCore {
            id,
            shutdown: AtomicBool::new(false),
            ring: ArrayQueue::new(POOL_SIZE),
            adapter: AllocAdapter::new(allocator),
            local_cache_size,
            stats: Default::default(),
        });
        let weak: Weak<dyn Rescuable<T>> = Arc::downgrade(&core);
        registry::register::<T>(id, weak);
        let pool = Self { core };
        pool.prewarm(POOL_SIZE / 2);
        pool
    }

    /// Acquire a slot, constructing or reinitializing the payload from
    /// `args`.
    ///
    /// Fast path: pop from this thread's local cache. Medium path: pop from
    /// the global ring. Slow path: allocate and construct a fresh payload.
    /// Returns [`PoolError::Shutdown`] if the pool's destructor has already
    /// begun, or [`PoolError::AllocationFailed`] if the slow path's
    /// allocation fails. A panic raised by the payload's own constructor on
    /// the slow path propagates to this call, per [`crate::alloc_adapter::AllocAdapter::construct_with`].
    pub fn acquire(&self, args: T::Args) -> Result<PoolGuard<T, POOL_SIZE, A, STATS>, PoolError> {
        if self.core.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Shutdown);
        }
        self.core.stats.record_acquire();
        self.core.stats.inc_in_use();

        if let Some(mut slot) = local_cache::pop::<T>(self.core.id) {
            slot.as_mut().reset(args);
            slot.as_mut().set_thread_id(thread_id::current());
            self.core.stats.record_same_thread_hit();
            self.core.stats.record_cache_hit();
            return Ok(PoolGuard { core: self.core.clone(), slot: Some(slot) });
        }

        if let Some(mut slot) = self.core.ring.pop() {
            slot.as_mut().reset(args);
            slot.as_mut().set_thread_id(thread_id::current());
            self.core.stats.set_pool_size(self.core.ring.len() as u64);
            return Ok(PoolGuard { core: self.core.clone(), slot: Some(slot) });
        }

        match self.core.adapter.construct_with(args) {
            Some(ptr) => {
                self.core.stats.record_create();
                let mut slot = unsafe { Slot::from_raw(ptr) };
                slot.as_mut().set_thread_id(thread_id::current());
                Ok(PoolGuard { core: self.core.clone(), slot: Some(slot) })
            }
            None => {
                self.core.stats.dec_in_use();
                Err(PoolError::AllocationFailed)
            }
        }
    }

    /// Explicitly release a slot. Equivalent to dropping it; provided for
    /// callers that prefer an explicit call at the point of release.
    pub fn release(&self, guard: PoolGuard<T, POOL_SIZE, A, STATS>) {
        drop(guard);
    }

    /// Allocate and push up to `count` fresh slots into the global ring,
    /// stopping early if the ring is already near `POOL_SIZE`. Never blocks
    /// on the ring: partial progress due to allocation failure or the ring
    /// filling up is silent, observable only via [`Pool::get_stats`] /
    /// [`Pool::approx_size`].
    pub fn prewarm(&self, count: usize) {
        let room = POOL_SIZE.saturating_sub(self.approx_size());
        let mut remaining = count.min(room);

        while remaining > 0 {
            let batch_size = remaining.min(BATCH_SIZE);
            let mut allocated = Vec::with_capacity(batch_size);
            let mut alloc_failed = false;
            for _ in 0..batch_size {
                match self.core.adapter.allocate_and_construct() {
                    Some(ptr) => allocated.push(ptr),
                    None => {
                        alloc_failed = true;
                        break;
                    }
                }
            }

            if alloc_failed {
                for ptr in allocated {
                    self.core.adapter.destroy_and_deallocate(ptr);
                }
                break;
            }

            let mut pushed = 0u64;
            let mut ring_full = false;
            for ptr in allocated {
                if ring_full {
                    self.core.adapter.destroy_and_deallocate(ptr);
                    continue;
                }
                let slot = unsafe { Slot::from_raw(ptr) };
                match self.core.ring.push(slot) {
                    Ok(()) => pushed += 1,
                    Err(slot) => {
                        self.core.adapter.destroy_and_deallocate(slot.into_raw());
                        ring_full = true;
                    }
                }
            }
            // `creates` tracks slow-path acquire allocations only (spec
            // scenario 1: auto-prewarm must not inflate it); prewarm batches
            // only show up in `batch_operations` and `current_pool_size`.
            self.core.stats.record_batch_op(pushed);
            self.core.stats.set_pool_size(self.core.ring.len() as u64);

            if ring_full {
                break;
            }
            remaining -= batch_size;
        }
    }

    /// Move every slot currently cached on the calling thread into the
    /// global ring (destroying any that no longer fit).
    pub fn flush_local_cache(&self) {
        let core = &self.core;
        let mut moved = 0u64;
        local_cache::drain::<T>(core.id, |slot| {
            match core.ring.push(slot) {
                Ok(()) => moved += 1,
                Err(slot) => core.adapter.destroy_and_deallocate(slot.into_raw()),
            }
        });
        if moved > 0 {
            core.stats.record_batch_op(moved);
            core.stats.set_pool_size(core.ring.len() as u64);
        }
    }

    /// Flush the calling thread's cache into the ring, then destroy up to
    /// `max` idle slots from the ring. Returns the number actually
    /// destroyed.
    pub fn shrink(&self, max: usize) -> usize {
        self.flush_local_cache();
        let mut destroyed = 0usize;
        while destroyed < max {
            let mut batch = 0u64;
            for _ in 0..(max - destroyed).min(BATCH_SIZE) {
                match self.core.ring.pop() {
                    Some(slot) => {
                        self.core.adapter.destroy_and_deallocate(slot.into_raw());
                        destroyed += 1;
                        batch += 1;
                    }
                    None => break,
                }
            }
            self.core.stats.record_batch_op(batch);
            self.core.stats.set_pool_size(self.core.ring.len() as u64);
            if batch == 0 {
                break;
            }
        }
        destroyed
    }

    /// A point-in-time snapshot of this pool's counters. Every field is
    /// zero if `STATS = false`.
    pub fn get_stats(&self) -> Stats {
        self.core.stats.snapshot()
    }

    /// The ring's fixed compile-time capacity.
    pub const fn capacity(&self) -> usize {
        POOL_SIZE
    }

    /// Approximate number of idle slots currently sitting in the global
    /// ring (does not include slots cached on any thread).
    pub fn approx_size(&self) -> usize {
        self.core.ring.len()
    }
}

impl<T, const POOL_SIZE: usize, A, const STATS: bool> Drop for Pool<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
{
    fn drop(&mut self) {
        self.core.shutdown.store(true, Ordering::Release);
        // Best-effort grace period for in-flight acquire/release calls
        // already past the shutdown check; not authoritative.
        std::thread::sleep(std::time::Duration::from_millis(2));
        registry::unregister::<T>(self.core.id);
        loop {
            let mut drained = 0usize;
            for _ in 0..SHUTDOWN_DRAIN_BATCH {
                match self.core.ring.pop() {
                    Some(slot) => {
                        self.core.adapter.destroy_and_deallocate(slot.into_raw());
                        drained += 1;
                    }
                    None => break,
                }
            }
            if drained == 0 {
                break;
            }
        }
    }
}

/// An owning handle to one acquired payload. Returns the payload to the
/// pool it came from on drop (or via [`Pool::release`], which just drops
/// it).
pub struct PoolGuard<T, const POOL_SIZE: usize, A, const STATS: bool>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
    T::Args: Default,
{
    core: Arc<PoolCore<T, POOL_SIZE, A, STATS>>,
    slot: Option<Slot<T>>,
}

impl<T, const POOL_SIZE: usize, A, const STATS: bool> PoolGuard<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
    T::Args: Default,
{
    /// Take ownership of the payload without returning it to the pool; the
    /// block that backed it is freed (without running `T`'s destructor,
    /// since the value just moved out).
    pub fn detach(mut self) -> T {
        let slot = self.slot.take().expect("slot taken before drop");
        let ptr = slot.into_raw();
        let value = unsafe { ptr::read(ptr.as_ptr()) };
        self.core.adapter.deallocate_uninit(ptr);
        value
    }
}

impl<T, const POOL_SIZE: usize, A, const STATS: bool> Deref for PoolGuard<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
    T::Args: Default,
{
    type Target = T;
    fn deref(&self) -> &T {
        self.slot.as_ref().expect("slot taken before drop").as_ref()
    }
}

impl<T, const POOL_SIZE: usize, A, const STATS: bool> DerefMut for PoolGuard<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
    T::Args: Default,
{
    fn deref_mut(&mut self) -> &mut T {
        self.slot.as_mut().expect("slot taken before drop").as_mut()
    }
}

impl<T, const POOL_SIZE: usize, A, const STATS: bool> Drop for PoolGuard<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
    T::Args: Default,
{
    fn drop(&mut self) {
        let Some(mut slot) = self.slot.take() else { return };
        let core = &self.core;

        core.stats.record_release();
        core.stats.dec_in_use();

        let current = thread_id::current();
        let same_thread = slot.as_ref().thread_id().map(|id| id == current).unwrap_or(true);
        // Release-time cleanup: run the payload's own teardown hook before
        // deciding where the slot goes, then its reset chain (a no-op for
        // payloads that only implement `destroy`).
        slot.as_mut().destroy();
        slot.as_mut().reset(T::Args::default());
        let shutdown = core.shutdown.load(Ordering::Acquire);

        let mut remaining = Some(slot);
        if same_thread && !shutdown {
            if let Some(s) = remaining.take() {
                let origin: Weak<dyn Rescuable<T>> = Arc::downgrade(core);
                let destroyer: Arc<dyn Destroyer<T>> = core.clone();
                match local_cache::push(core.id, core.local_cache_size, &origin, &destroyer, s) {
                    Ok(()) => return,
                    Err(s) => remaining = Some(s),
                }
            }
        }

        if let Some(s) = remaining {
            if shutdown {
                core.adapter.destroy_and_deallocate(s.into_raw());
            } else {
                match core.ring.push(s) {
                    Ok(()) => core.stats.set_pool_size(core.ring.len() as u64),
                    Err(s) => core.adapter.destroy_and_deallocate(s.into_raw()),
                }
            }
        }

        if !same_thread {
            core.stats.record_cross_thread();
        }
    }
}

// A `PoolGuard` is only ever handed to the thread that acquired it, but it
// must be `Send` so it can be moved to another thread before being
// released or dropped there (the whole point of cross-thread producer /
// consumer use).
unsafe impl<T, const POOL_SIZE: usize, A, const STATS: bool> Send for PoolGuard<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
    T::Args: Default,
{
}
