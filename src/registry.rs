//! C5: the process-wide registry of live pools, consulted only by a dying
//! thread's local cache trying to rescue its remaining slots.
//!
//! The registry is keyed in two levels, mirroring the thread-local pool
//! lookup the teacher crate uses for its own per-type pools (see
//! `global::with_pool`): an outer map from `TypeId` to a type-erased inner
//! map, downcast back to the concrete `FxHashMap<u64, Entry<T>>` on access.
//! The outer map only grows when a process sees its first pool of a given
//! payload type; the inner map grows/shrinks with that type's pool
//! instances.
use fxhash::FxHashMap;
use std::{
    any::{Any, TypeId},
    sync::{Arc, LazyLock, RwLock, Weak},
    time::Instant,
};

use crate::{slot::Slot, Poolable};

/// What a dying cache needs from a candidate pool: whether it still accepts
/// new slots, and a way to try handing one over.
pub(crate) trait Rescuable<T>: Send + Sync {
    fn is_shutdown(&self) -> bool;
    fn try_rescue(&self, slot: Slot<T>) -> Result<(), Slot<T>>;
    fn note_cross_thread_rescue(&self);
}

struct Entry<T> {
    // carried for diagnostic use only, per spec.
    #[allow(dead_code)]
    created_at: Instant,
    target: Weak<dyn Rescuable<T>>,
}

type Inner<T> = RwLock<FxHashMap<u64, Entry<T>>>;

static OUTER: LazyLock<RwLock<FxHashMap<TypeId, Box<dyn Any + Send + Sync>>>> =
    LazyLock::new(|| RwLock::new(FxHashMap::default()));

fn with_inner<T, R>(f: impl FnOnce(&Inner<T>) -> R) -> R
where
    T: Poolable + 'static,
{
    let id = TypeId::of::<T>();
    if let Some(inner) = OUTER.read().unwrap().get(&id) {
        return f(inner.downcast_ref::<Inner<T>>().expect("registry type mismatch"));
    }
    let mut outer = OUTER.write().unwrap();
    let boxed = outer.entry(id).or_insert_with(|| Box::new(Inner::<T>::default()));
    f(boxed.downcast_ref::<Inner<T>>().expect("registry type mismatch"))
}

/// Register a newly constructed pool so dying threads can rescue into it.
/// `id` must be unique among live pools of this `T`.
pub(crate) fn register<T: Poolable + 'static>(id: u64, target: Weak<dyn Rescuable<T>>) {
    with_inner::<T, _>(|inner| {
        inner
            .write()
            .unwrap()
            .insert(id, Entry { created_at: Instant::now(), target });
    });
}

/// Remove a pool from the registry. Called once, at the start of that pool's
/// shutdown sequence, so that no dying thread picks it as a rescue target
/// after that point.
pub(crate) fn unregister<T: Poolable + 'static>(id: u64) {
    with_inner::<T, _>(|inner| {
        inner.write().unwrap().remove(&id);
    });
}

/// Try to push `slot` into any live, non-shut-down pool of this `T` other
/// than the one the caller already tried. Returns the slot back if none
/// would take it.
pub(crate) fn rescue<T: Poolable + 'static>(skip: u64, slot: Slot<T>) -> Result<(), Slot<T>> {
    with_inner::<T, _>(|inner| {
        let candidates: Vec<Arc<dyn Rescuable<T>>> = inner
            .read()
            .unwrap()
            .iter()
            .filter(|(id, _)| **id != skip)
            .filter_map(|(_, e)| e.target.upgrade())
            .collect();
        let mut slot = slot;
        for pool in candidates {
            if pool.is_shutdown() {
                continue;
            }
            match pool.try_rescue(slot) {
                Ok(()) => {
                    pool.note_cross_thread_rescue();
                    return Ok(());
                }
                Err(back) => slot = back,
            }
        }
        Err(slot)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Default)]
    struct Leaf;

    impl Poolable for Leaf {
        type Args = ();
        fn allocate(_: ()) -> Self {
            Leaf
        }
    }

    struct FakePool {
        shutdown: AtomicBool,
        accepted: AtomicU64,
    }

    impl Rescuable<Leaf> for FakePool {
        fn is_shutdown(&self) -> bool {
            self.shutdown.load(Ordering::Acquire)
        }
        fn try_rescue(&self, slot: Slot<Leaf>) -> Result<(), Slot<Leaf>> {
            self.accepted.fetch_add(1, Ordering::Relaxed);
            // `Slot` has no `Drop` impl by design (see slot.rs); free the
            // `Box` this test allocated it from directly.
            let _ = unsafe { Box::from_raw(slot.into_raw().as_ptr()) };
            Ok(())
        }
        fn note_cross_thread_rescue(&self) {}
    }

    #[test]
    fn rescue_skips_shutdown_and_self() {
        let live = Arc::new(FakePool { shutdown: AtomicBool::new(false), accepted: AtomicU64::new(0) });
        let dead = Arc::new(FakePool { shutdown: AtomicBool::new(true), accepted: AtomicU64::new(0) });
        register::<Leaf>(1, Arc::downgrade(&live) as Weak<dyn Rescuable<Leaf>>);
        register::<Leaf>(2, Arc::downgrade(&dead) as Weak<dyn Rescuable<Leaf>>);

        let leaf = unsafe {
            let ptr = std::ptr::NonNull::new(Box::into_raw(Box::new(Leaf))).unwrap();
            Slot::from_raw(ptr)
        };
        let res = rescue::<Leaf>(99, leaf);
        assert!(res.is_ok());
        assert_eq!(live.accepted.load(Ordering::Relaxed), 1);
        assert_eq!(dead.accepted.load(Ordering::Relaxed), 0);

        unregister::<Leaf>(1);
        unregister::<Leaf>(2);
    }
}
