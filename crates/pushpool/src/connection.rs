use core::fmt;

/// A stateful, single-owner connection that a [`PooledConnection`] can
/// multiplex.
///
/// Implementations do not need to be [`Sync`]. The pool gives every worker its
/// own instance produced by [`Connection::copy`], and only ever touches that
/// instance from the owning worker, apart from the occasional cross-cutting
/// [`Connection::set_cache_length`] or [`Connection::close`] issued by the pool
/// itself under a per-instance lock.
///
/// Failure reporting is the implementation's own business. A pool forwards
/// whatever [`Connection::send_message`] returns to its logs and nothing more,
/// so implementations that need callers to observe delivery failures should
/// carry their own listener (and hand it to every copy).
///
/// [`PooledConnection`]: crate::PooledConnection
pub trait Connection: Send + 'static {
    /// The unit of work sent over the connection.
    type Message: Send + 'static;

    /// The error reported by the connection's own operations.
    type Error: core::error::Error + Send + Sync + 'static;

    /// Sends a single message, reconnecting or retrying internally as the
    /// implementation sees fit.
    ///
    /// # Errors
    ///
    /// Returns the implementation's error if the message could not be
    /// delivered.
    fn send_message(&mut self, message: Self::Message) -> Result<(), Self::Error>;

    /// Produces an independent, not-yet-connected instance with the same
    /// configuration.
    fn copy(&self) -> Self
    where
        Self: Sized;

    /// Releases every resource held by this instance.
    ///
    /// Must be idempotent: closing an already closed connection is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns the implementation's error if releasing a resource failed.
    fn close(&mut self) -> Result<(), Self::Error>;

    /// Performs a lightweight connectivity check.
    ///
    /// # Errors
    ///
    /// Returns the implementation's error if the endpoint is unreachable.
    fn test_connection(&mut self) -> Result<(), Self::Error>;

    /// Sets the number of sent messages retained for resend and recovery.
    fn set_cache_length(&mut self, cache_length: usize);

    /// Returns the number of sent messages retained for resend and recovery.
    ///
    /// # Errors
    ///
    /// Returns an error when there is no instance to read the value from.
    fn cache_length(&self) -> Result<usize, Self::Error>;
}

/// Identity of one of the pool's worker threads, in `0..capacity`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl WorkerId {
    /// Creates a worker identity from its slot index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the slot index of this worker.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
