//! C3: the per-thread LIFO cache that absorbs the common "acquire and
//! release on the same thread" path without touching the global ring.
//!
//! There is one thread-local slot per payload type `T` (a `static` can't be
//! generic, so this is the usual `TypeId`-keyed type erasure the teacher
//! crate already uses for its own thread-local pools — see
//! `local::with_pool`), holding a map from pool identity to that pool's
//! cache on this thread. Multiple `Pool<T, ..>` instances of the same `T`
//! therefore share one thread-local lookup but never share cache contents.
use crate::{
    registry::{self, Rescuable},
    slot::Slot,
    Poolable,
};
use fxhash::FxHashMap;
use std::{
    any::{Any, TypeId},
    cell::RefCell,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

/// Last-resort destruction, used only when no live pool (origin or rescued)
/// will take a slot back.
pub(crate) trait Destroyer<T>: Send + Sync {
    fn destroy(&self, slot: Slot<T>);
}

pub(crate) struct CacheEntry<T: Poolable + 'static> {
    valid: AtomicBool,
    max: usize,
    slots: Vec<Slot<T>>,
    origin_id: u64,
    origin: Weak<dyn Rescuable<T>>,
    destroyer: Arc<dyn Destroyer<T>>,
}

impl<T: Poolable + 'static> CacheEntry<T> {
    fn rescue_or_destroy(&self, slot: Slot<T>) {
        if let Some(pool) = self.origin.upgrade() {
            if !pool.is_shutdown() {
                match pool.try_rescue(slot) {
                    Ok(()) => return,
                    Err(slot) => {
                        finish_rescue(self.origin_id, &self.destroyer, slot);
                        return;
                    }
                }
            }
        }
        finish_rescue(self.origin_id, &self.destroyer, slot);
    }
}

fn finish_rescue<T: Poolable + 'static>(
    origin_id: u64,
    destroyer: &Arc<dyn Destroyer<T>>,
    slot: Slot<T>,
) {
    match registry::rescue::<T>(origin_id, slot) {
        Ok(()) => {}
        Err(slot) => destroyer.destroy(slot),
    }
}

impl<T: Poolable + 'static> Drop for CacheEntry<T> {
    fn drop(&mut self) {
        self.valid.store(false, Ordering::Release);
        while let Some(slot) = self.slots.pop() {
            self.rescue_or_destroy(slot);
        }
    }
}

thread_local! {
    static CACHES: RefCell<FxHashMap<TypeId, Box<dyn Any>>> = RefCell::new(FxHashMap::default());
}

fn with_map<T, R>(f: impl FnOnce(&mut FxHashMap<u64, CacheEntry<T>>) -> R) -> Option<R>
where
    T: Poolable + 'static,
{
    CACHES
        .try_with(|caches| {
            // Guards against the pathological case of a payload's `Drop`
            // trying to push itself back into the same thread's cache from
            // inside the cache's own teardown (which would re-enter this
            // `RefCell` while it is already mutably borrowed).
            let mut caches = caches.try_borrow_mut().ok()?;
            let map = caches
                .entry(TypeId::of::<T>())
                .or_insert_with(|| Box::new(FxHashMap::<u64, CacheEntry<T>>::default()));
            let map =
                map.downcast_mut::<FxHashMap<u64, CacheEntry<T>>>().expect("cache type mismatch");
            Some(f(map))
        })
        .ok()
        .flatten()
}

/// Pop a slot from this thread's cache for `pool_id`, if one exists and the
/// cache has not been invalidated.
pub(crate) fn pop<T: Poolable + 'static>(pool_id: u64) -> Option<Slot<T>> {
    with_map::<T, _>(|map| {
        let entry = map.get_mut(&pool_id)?;
        if !entry.valid.load(Ordering::Acquire) {
            return None;
        }
        entry.slots.pop()
    })
    .flatten()
}

/// Try to push a slot into this thread's cache for `pool_id`, creating the
/// cache entry on first use. Returns the slot back if the cache is full or
/// invalid (so the caller can fall back to the global ring).
pub(crate) fn push<T: Poolable + 'static>(
    pool_id: u64,
    max: usize,
    origin: &Weak<dyn Rescuable<T>>,
    destroyer: &Arc<dyn Destroyer<T>>,
    slot: Slot<T>,
) -> Result<(), Slot<T>> {
    with_map::<T, _>(|map| {
        let entry = map.entry(pool_id).or_insert_with(|| CacheEntry {
            valid: AtomicBool::new(true),
            max,
            slots: Vec::with_capacity(max),
            origin_id: pool_id,
            origin: origin.clone(),
            destroyer: destroyer.clone(),
        });
        if !entry.valid.load(Ordering::Acquire) || entry.slots.len() >= entry.max {
            return Err(slot);
        }
        entry.slots.push(slot);
        Ok(())
    })
    .unwrap_or(Err(slot))
}

/// Drain every slot currently cached for `pool_id` on this thread, handing
/// each to `sink` (used by `flush_local_cache`, which pushes straight into
/// the global ring rather than going through rescue).
pub(crate) fn drain<T: Poolable + 'static>(pool_id: u64, mut sink: impl FnMut(Slot<T>)) {
    let drained: Vec<Slot<T>> = with_map::<T, _>(|map| {
        map.get_mut(&pool_id).map(|entry| std::mem::take(&mut entry.slots)).unwrap_or_default()
    })
    .unwrap_or_default();
    for slot in drained {
        sink(slot);
    }
}

/// Number of slots currently cached for `pool_id` on this thread (approx,
/// diagnostic use only).
pub(crate) fn len<T: Poolable + 'static>(pool_id: u64) -> usize {
    with_map::<T, _>(|map| map.get(&pool_id).map(|e| e.slots.len()).unwrap_or(0)).unwrap_or(0)
}
