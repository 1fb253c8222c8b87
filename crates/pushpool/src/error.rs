//! Error types for the connection pool.
//!
//! ## Error Cases
//! - `NoActiveConnection`: A per-connection value was queried before any
//!   worker created its connection.
//! - `PoolClosed`: The pool was closed and refuses to create new connections.
//! - `UnknownWorker`: A worker identity outside the pool capacity was used.
//! - `Config`: The pool configuration failed validation.
//! - `Connection`: The wrapped connection reported an error.

use crate::WorkerId;

/// Result type used throughout the pool, generic over the wrapped
/// connection's error.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Rejected pool configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A pool needs at least one worker.
    #[error("pool capacity must be greater than 0")]
    ZeroCapacity,

    /// Worker threads need a name prefix.
    #[error("worker thread name must not be empty")]
    EmptyThreadName,
}

/// Unified error type for pooled connections.
///
/// `E` is the error type of the wrapped [`Connection`](crate::Connection).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error<E> {
    /// No worker has created its connection yet, so there is nothing to read
    /// a per-connection value from.
    #[error("no active connection")]
    NoActiveConnection,

    /// The pool was closed.
    #[error("pool is closed")]
    PoolClosed,

    /// The worker identity does not belong to this pool.
    #[error("worker {0} is outside the pool capacity")]
    UnknownWorker(WorkerId),

    /// The pool configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),

    /// The wrapped connection failed.
    #[error("connection error: {0}")]
    Connection(#[source] E),
}
