//! C7: a reference-counted handle wrapper around [`PoolGuard`], for cases
//! where the acquired payload needs to be cloned and handed to several
//! owners rather than held by exactly one. Mirrors the teacher crate's own
//! `GPooled`/`LPooled` distinction between a unique handle and a shared
//! one, but built by wrapping the unique handle in an `Arc` instead of
//! duplicating its release logic (grounded on `arc.rs`'s `impl_arc!`
//! pattern of layering reference counting on top of an existing owning
//! wrapper).
use crate::{
    alloc_adapter::RawAllocator,
    pool::{Pool, PoolGuard},
    Poolable, PoolError,
};
use std::{ops::Deref, sync::Arc};

/// A cloneable handle to a pooled payload. The payload returns to the pool
/// it came from only once every clone has been dropped.
pub struct Shared<T, const POOL_SIZE: usize, A, const STATS: bool>(
    Arc<PoolGuard<T, POOL_SIZE, A, STATS>>,
)
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
    T::Args: Default;

impl<T, const POOL_SIZE: usize, A, const STATS: bool> Shared<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
    T::Args: Default,
{
    fn new(guard: PoolGuard<T, POOL_SIZE, A, STATS>) -> Self {
        Self(Arc::new(guard))
    }

    /// Get a mutable reference to the payload, if this is the only
    /// remaining clone.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        Arc::get_mut(&mut self.0).map(|guard| &mut *guard)
    }

    /// Number of clones of this handle currently alive (including `self`).
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl<T, const POOL_SIZE: usize, A, const STATS: bool> Clone for Shared<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
    T::Args: Default,
{
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T, const POOL_SIZE: usize, A, const STATS: bool> Deref for Shared<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
    T::Args: Default,
{
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T, const POOL_SIZE: usize, A, const STATS: bool> Pool<T, POOL_SIZE, A, STATS>
where
    T: Poolable + Send + 'static,
    A: RawAllocator<T> + 'static,
    T::Args: Default + Send,
{
    /// Like [`Pool::acquire`], but wraps the result in a cloneable
    /// [`Shared`] handle instead of a unique [`PoolGuard`].
    pub fn acquire_shared(&self, args: T::Args) -> Result<Shared<T, POOL_SIZE, A, STATS>, PoolError> {
        self.acquire(args).map(Shared::new)
    }
}
