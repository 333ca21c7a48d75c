//! A small, stable per-thread integer, used as the affinity tag compared
//! against in release's same-thread check. Cheaper than hashing
//! `std::thread::current().id()` on every acquire/release.
use std::{cell::Cell, sync::atomic::{AtomicU64, Ordering}};

static NEXT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ID: Cell<u64> = const { Cell::new(0) };
}

/// The current thread's id, assigned lazily on first call and stable for
/// the lifetime of the thread.
pub(crate) fn current() -> u64 {
    ID.with(|cell| {
        let existing = cell.get();
        if existing != 0 {
            return existing;
        }
        let fresh = NEXT.fetch_add(1, Ordering::Relaxed);
        cell.set(fresh);
        fresh
    })
}
