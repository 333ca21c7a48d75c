use thiserror::Error;

/// The two-variant result type surfaced by [`crate::pool::Pool::acquire`].
///
/// Every other failure mode described in the pool's contract (a full ring on
/// release, a panicking `reset`/`destroy`/drop, a partially filled prewarm
/// batch) is handled internally and never reaches the caller; see the
/// module docs for the full rationale.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum PoolError {
    /// `acquire` was called after the pool's destructor had already begun.
    #[error("pool is shut down")]
    Shutdown,

    /// The allocator failed to produce storage for a new payload on the slow
    /// acquire path. The pool's `in_use` counter is restored before this is
    /// returned.
    #[error("allocation failed")]
    AllocationFailed,
}
