use pushpool::Connection;
use rand::Rng;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("simulated delivery failure for message {0}")]
    Delivery(u64),
    #[error("connection {0} is closed")]
    Closed(u64),
}

/// Counters shared by every copy of a [`SimulatedConnection`].
#[derive(Debug, Default)]
pub struct SimStats {
    pub connections: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub closed: AtomicU64,
}

/// A connection that sleeps for a fixed latency per send and fails at a
/// configured rate.
pub struct SimulatedConnection {
    id: u64,
    latency: Duration,
    failure_rate: f64,
    cache_length: usize,
    closed: bool,
    stats: Arc<SimStats>,
}

impl SimulatedConnection {
    pub fn new(latency: Duration, failure_rate: f64, stats: Arc<SimStats>) -> Self {
        Self {
            id: 0,
            latency,
            failure_rate,
            cache_length: 100,
            closed: false,
            stats,
        }
    }
}

impl Connection for SimulatedConnection {
    type Message = u64;
    type Error = SimError;

    fn send_message(&mut self, message: u64) -> Result<(), SimError> {
        if self.closed {
            return Err(SimError::Closed(self.id));
        }
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if rand::rng().random_bool(self.failure_rate) {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            return Err(SimError::Delivery(message));
        }
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn copy(&self) -> Self {
        Self {
            id: self.stats.connections.fetch_add(1, Ordering::Relaxed) + 1,
            latency: self.latency,
            failure_rate: self.failure_rate,
            cache_length: 100,
            closed: false,
            stats: Arc::clone(&self.stats),
        }
    }

    fn close(&mut self) -> Result<(), SimError> {
        if !self.closed {
            self.closed = true;
            self.stats.closed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn test_connection(&mut self) -> Result<(), SimError> {
        if self.closed {
            return Err(SimError::Closed(self.id));
        }
        Ok(())
    }

    fn set_cache_length(&mut self, cache_length: usize) {
        self.cache_length = cache_length;
    }

    fn cache_length(&self) -> Result<usize, SimError> {
        Ok(self.cache_length)
    }
}
