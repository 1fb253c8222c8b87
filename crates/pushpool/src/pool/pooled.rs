use super::{dispatcher::Dispatcher, registry::Registry};
use crate::{Connection, Error, PoolConfig, Result};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

/// A [`Connection`] that fans sends out over a bounded pool of workers, each
/// pinned to its own copy of a prototype connection.
///
/// A pooled connection is itself a [`Connection`], so it can stand in wherever
/// a single connection is expected. Its operations are also available as
/// `&self` methods, which lets many callers share one pool behind an [`Arc`].
///
/// - [`send_message`](Self::send_message) queues the message and returns
///   immediately. The first time a worker picks up work it copies the
///   prototype; every later message on that worker goes over the same copy.
/// - [`close`](Self::close) drains the queue (bounded by
///   [`PoolConfig::drain_timeout`]), then closes every copy and finally the
///   prototype.
///
/// Delivery failures are the wrapped connection's business. The pool logs
/// what [`Connection::send_message`] returns and never retries.
pub struct PooledConnection<C: Connection> {
    prototype: Arc<Mutex<C>>,
    config: PoolConfig,
    dispatcher: Dispatcher,
    registry: Arc<Registry<C>>,
    cache_length_lock: Mutex<()>,
    closed: AtomicBool,
}

impl<C: Connection> PooledConnection<C> {
    /// Creates a pool of at most `capacity` workers around `prototype`, with
    /// the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `capacity` is 0.
    pub fn new(prototype: C, capacity: usize) -> Result<Self, C::Error> {
        let config = PoolConfig::new(capacity)?;
        Ok(Self::with_config(prototype, config))
    }

    /// Creates a pool around `prototype` with a caller-supplied configuration.
    pub fn with_config(prototype: C, config: PoolConfig) -> Self {
        Self::from_shared(Arc::new(Mutex::new(prototype)), config)
    }

    fn from_shared(prototype: Arc<Mutex<C>>, config: PoolConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new(Arc::clone(&prototype), config.capacity())),
            dispatcher: Dispatcher::new(&config),
            prototype,
            config,
            cache_length_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Queues `message` for the first free worker.
    ///
    /// Never blocks and never fails. Send errors are logged by the worker.
    /// Messages queued after [`close`](Self::close) are dropped.
    pub fn send_message(&self, message: C::Message) {
        let registry = Arc::clone(&self.registry);
        self.dispatcher.submit(Box::new(move |worker| {
            match registry.send(worker, message) {
                Ok(()) => {}
                Err(Error::Connection(e)) => {
                    tracing::warn!("Worker {worker} failed to send message: {e}");
                }
                Err(e) => tracing::warn!("Worker {worker} dropped a message: {e}"),
            }
        }));
    }

    /// Returns an independent pool around the same prototype, with a fresh
    /// set of workers and no connections of its own yet.
    ///
    /// Closing either pool closes the shared prototype.
    pub fn copy(&self) -> Self {
        Self::from_shared(Arc::clone(&self.prototype), self.config.clone())
    }

    /// Drains the queue, then closes every worker connection and the
    /// prototype.
    ///
    /// Blocks for at most [`PoolConfig::drain_timeout`] waiting for queued
    /// work. A drain that times out is logged and the close carries on; work
    /// still queued at that point is abandoned. A connection whose worker is
    /// still sending is closed by that worker once the send returns, and any
    /// failure to do so is only logged. Calling this again is a no-op.
    ///
    /// # Errors
    ///
    /// Every connection is closed regardless of failures. The first failure
    /// is returned as [`Error::Connection`] afterwards.
    pub fn close(&self) -> Result<(), C::Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _entered = self.config.span().enter();
        tracing::debug!("Closing pool");

        let timeout = self.config.drain_timeout();
        let deadline = Instant::now().checked_add(timeout);

        // The dispatcher logs the timeout itself. Workers it joined hold no
        // connection, the ones it left behind get until the same deadline.
        let drained = self.dispatcher.shutdown_and_drain(timeout);
        let deadline = if drained { None } else { deadline };

        let mut failures = self.registry.close_all(deadline).into_iter();
        let first = failures.next().map(|(_, e)| e);

        let prototype = self.prototype.lock().close();
        if let Err(e) = &prototype {
            tracing::warn!("Failed to close prototype connection: {e}");
        }

        tracing::debug!("Pool closed");
        match (first, prototype) {
            (Some(e), _) | (None, Err(e)) => Err(Error::Connection(e)),
            (None, Ok(())) => Ok(()),
        }
    }

    /// Checks connectivity through the prototype, independently of the
    /// workers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the prototype reports a failure.
    pub fn test_connection(&self) -> Result<(), C::Error> {
        self.prototype
            .lock()
            .test_connection()
            .map_err(Error::Connection)
    }

    /// Applies `cache_length` to every worker connection created so far.
    ///
    /// Connections created afterwards start with whatever the prototype's
    /// copy produces, so the workers may disagree until this is called again.
    pub fn set_cache_length(&self, cache_length: usize) {
        let _serialized = self.cache_length_lock.lock();
        self.registry
            .for_each_clone(|_, conn| conn.set_cache_length(cache_length));
    }

    /// Reads the cache length of one of the worker connections.
    ///
    /// No particular worker is guaranteed. See
    /// [`set_cache_length`](Self::set_cache_length) for when they can differ.
    ///
    /// # Errors
    ///
    /// - [`Error::NoActiveConnection`] if no worker has created a connection
    ///   yet.
    /// - [`Error::Connection`] if the connection fails to report it.
    pub fn cache_length(&self) -> Result<usize, C::Error> {
        let conn = self.registry.any_clone().ok_or(Error::NoActiveConnection)?;
        let cache_length = conn.lock().cache_length().map_err(Error::Connection)?;
        Ok(cache_length)
    }

    /// Returns the maximum number of concurrently active workers.
    pub const fn capacity(&self) -> usize {
        self.config.capacity()
    }

    /// Returns the number of worker connections created so far.
    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl<C: Connection> Connection for PooledConnection<C> {
    type Message = C::Message;
    type Error = Error<C::Error>;

    fn send_message(&mut self, message: Self::Message) -> Result<(), C::Error> {
        PooledConnection::send_message(self, message);
        Ok(())
    }

    fn copy(&self) -> Self {
        PooledConnection::copy(self)
    }

    fn close(&mut self) -> Result<(), C::Error> {
        PooledConnection::close(self)
    }

    fn test_connection(&mut self) -> Result<(), C::Error> {
        PooledConnection::test_connection(self)
    }

    fn set_cache_length(&mut self, cache_length: usize) {
        PooledConnection::set_cache_length(self, cache_length);
    }

    fn cache_length(&self) -> Result<usize, C::Error> {
        PooledConnection::cache_length(self)
    }
}
