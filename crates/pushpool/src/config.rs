use crate::ConfigError;
use core::time::Duration;
use tracing::Span;

/// How long [`PooledConnection::close`] waits for queued work by default.
///
/// [`PooledConnection::close`]: crate::PooledConnection::close
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Name prefix given to worker threads by default. The worker index is
/// appended.
pub const DEFAULT_THREAD_NAME: &str = "pushpool-worker";

/// Worker pool configuration.
///
/// Every event the pool logs is emitted inside [`PoolConfig::span`], so a
/// caller can scope (or silence) one pool's logs without touching global
/// subscriber state.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    capacity: usize,
    drain_timeout: Duration,
    thread_name: String,
    span: Span,
}

impl PoolConfig {
    /// Creates a configuration for a pool of at most `capacity` concurrently
    /// active workers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroCapacity`] if `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        Ok(Self {
            capacity,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            span: tracing::info_span!("pushpool", capacity),
        })
    }

    /// Sets how long closing the pool waits for queued and in-flight work.
    ///
    /// [`Duration::MAX`] waits for as long as it takes.
    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Sets the worker thread name prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyThreadName`] if `thread_name` is empty.
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Result<Self, ConfigError> {
        let thread_name = thread_name.into();
        if thread_name.is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        self.thread_name = thread_name;
        Ok(self)
    }

    /// Sets the span every pool event is recorded in.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Maximum number of concurrently active workers.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// How long closing waits for queued and in-flight work.
    pub const fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Worker thread name prefix.
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Span every pool event is recorded in.
    pub const fn span(&self) -> &Span {
        &self.span
    }
}
