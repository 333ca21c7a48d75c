//! A high-throughput, thread-safe object pool.
//!
//! Acquiring reuses an idle payload when one is available instead of
//! allocating a new one; releasing returns it rather than dropping it. Each
//! `Pool<T>` keeps two tiers of storage: a lock-free ring shared by every
//! thread, and a small LIFO cache private to whichever thread last touched
//! it, so the common "acquire and release on the same thread" path never
//! touches the ring at all.
//!
//! ```
//! use poolshark::{Pool, Poolable, alloc_adapter::GlobalAllocator};
//!
//! #[derive(Default)]
//! struct Buffer(Vec<u8>);
//!
//! impl Poolable for Buffer {
//!     type Args = ();
//!     fn allocate(_: ()) -> Self { Buffer(Vec::with_capacity(4096)) }
//!     fn reset(&mut self, _: ()) { self.0.clear() }
//! }
//!
//! let pool: Pool<Buffer, 1024> = Pool::new(GlobalAllocator);
//! let mut buf = pool.acquire(()).unwrap();
//! buf.0.extend_from_slice(b"hello");
//! // dropping `buf` returns it to the pool
//! ```
//!
//! # Which handle should I use?
//!
//! - [`Pool::acquire`] returns a [`pool::PoolGuard`], a unique owning handle.
//!   Use this by default.
//! - [`Pool::acquire_shared`] returns a [`shared::Shared`], a cloneable,
//!   reference-counted handle. Use this when several owners need the same
//!   payload and the payload should only return to the pool once the last
//!   of them drops it.
//!
//! # Implementing [`Poolable`]
//!
//! Only `allocate` is required. The other methods are capability probes
//! with no-op defaults: implement `reset` if a payload can be cheaply
//! reinitialized instead of rebuilt from scratch, `destroy` if it holds a
//! resource that needs explicit teardown before its memory is freed, and
//! `thread_id`/`set_thread_id` if it must always be released on the thread
//! that acquired it (e.g. it wraps a thread-affine handle like a GPU
//! context). A payload that implements none of these is still fully
//! poolable; it is just always treated as freshly built.
pub mod alloc_adapter;
mod config;
mod error;
mod local_cache;
mod pool;
mod registry;
mod shared;
mod slot;
pub mod stats;
mod thread_id;

#[cfg(test)]
mod test;

pub use config::PoolConfig;
pub use pool::{Pool, PoolGuard};
pub use shared::Shared;
pub use stats::Stats;

/// Capability dispatch for the payload a [`Pool`] stores. A concrete `impl
/// Poolable for T` overrides only the capabilities it needs; defaults
/// monomorphize to a no-op rather than going through a vtable.
pub trait Poolable: Sized {
    /// Arguments threaded through construction and every later
    /// reinitialization.
    type Args;

    /// Build a fresh payload from `args`. The only required method.
    fn allocate(args: Self::Args) -> Self;

    /// Reinitialize an existing payload from `args`, as an alternative to
    /// dropping and rebuilding it. Defaults to calling `build` and
    /// discarding `args` afterward; override if reinitialization needs
    /// more than that (e.g. capacity-preserving clears).
    fn build(&mut self, args: Self::Args) {
        let _ = args;
    }

    /// The recycle hook invoked both when a slot is handed back out on
    /// acquire (with the caller's `args`) and, with `Args::default()`, as
    /// an eager cleanup step on release. Defaults to `build`.
    fn reset(&mut self, args: Self::Args) {
        self.build(args);
    }

    /// Pre-return cleanup run on every release, before the slot is routed
    /// to the local cache, the ring, or final deallocation. Exists for
    /// payloads that need to tear something down between leases but have
    /// no cheap `reset`/`build` reinitialization to offer (e.g. releasing a
    /// borrowed resource they'll reacquire on the next `build`). Defaults
    /// to a no-op; Rust's own `Drop::drop` still runs on top of this if the
    /// slot is ultimately destroyed rather than recycled.
    fn destroy(&mut self) {}

    /// The thread a payload must be released on, if it has such an
    /// affinity. Slots without one (`None`, the default) can be released
    /// from any thread.
    fn thread_id(&self) -> Option<u64> {
        None
    }

    /// Record the thread that just acquired this payload. Called after
    /// every successful acquire; the default is a no-op, appropriate for
    /// payloads that never override `thread_id`.
    fn set_thread_id(&mut self, _id: u64) {}
}

pub use error::PoolError;
