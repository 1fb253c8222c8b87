//! Bounded pool of worker threads fed from one shared queue.
//!
//! This module defines the [`Dispatcher`], which runs submitted jobs on at
//! most `capacity` worker threads. Workers are spawned lazily, one per
//! submission, until the pool is full. Every worker pulls from the same
//! unbounded MPMC queue, so excess work waits for whichever worker frees up
//! first and submitting never blocks on a busy pool.
//!
//! Shutdown is a cooperative drain: the queue stops accepting jobs, every
//! worker is handed a [`WorkRequest::Shutdown`] behind the jobs already
//! queued, and the caller waits (bounded) for the acknowledgements.

use super::{
    request::{Job, WorkRequest},
    worker::worker_loop,
};
use crate::{PoolConfig, WorkerId};
use core::time::Duration;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Instant,
};
use tracing::Span;

/// A bounded executor running [`Job`]s on at most `capacity` worker threads.
pub struct Dispatcher {
    capacity: usize,
    thread_name: String,
    span: Span,
    tx: Sender<WorkRequest>,
    rx: Receiver<WorkRequest>,
    abandoned: Arc<AtomicBool>,
    state: Mutex<State>,
}

struct State {
    accepting: bool,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Creates an idle dispatcher. No thread is spawned until work arrives.
    pub fn new(config: &PoolConfig) -> Self {
        let (tx, rx) = unbounded();
        Self {
            capacity: config.capacity(),
            thread_name: config.thread_name().to_owned(),
            span: config.span().clone(),
            tx,
            rx,
            abandoned: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(State {
                accepting: true,
                workers: Vec::with_capacity(config.capacity()),
            }),
        }
    }

    /// Queues `job` to run on the first free worker, spawning a new worker if
    /// the pool is not yet full.
    ///
    /// Never waits for a worker to become free. Jobs submitted after
    /// [`Dispatcher::shutdown_and_drain`] are dropped with a warning.
    pub fn submit(&self, job: Job) {
        let mut state = self.state.lock();
        if !state.accepting {
            let _entered = self.span.enter();
            tracing::warn!("Dispatcher is shut down, dropping submitted job");
            return;
        }

        // The queue cannot disconnect while `self` holds the receiver.
        if self.tx.send(WorkRequest::Run(job)).is_err() {
            return;
        }

        if state.workers.len() < self.capacity {
            self.spawn_worker(&mut state);
        }
    }

    fn spawn_worker(&self, state: &mut State) {
        let worker_id = WorkerId::new(state.workers.len());
        let rx = self.rx.clone();
        let abandoned = Arc::clone(&self.abandoned);
        let span = self.span.clone();

        match thread::Builder::new()
            .name(format!("{}-{worker_id}", self.thread_name))
            .spawn(move || worker_loop(worker_id, rx, abandoned, span))
        {
            Ok(handle) => state.workers.push(handle),
            Err(e) => {
                // Queued work is still picked up by the workers that exist. A
                // later submission retries the spawn.
                let _entered = self.span.enter();
                tracing::error!("Failed to spawn worker {worker_id}: {e}");
            }
        }
    }

    /// Returns the number of worker threads spawned so far.
    pub fn spawned(&self) -> usize {
        self.state.lock().workers.len()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops accepting work and waits up to `timeout` for queued and in-flight
    /// jobs to finish.
    ///
    /// - Refuses further submissions.
    /// - Queues one [`WorkRequest::Shutdown`] per worker behind the pending
    ///   jobs.
    /// - Waits for every worker to acknowledge, until `timeout` elapses.
    ///
    /// Returns `true` if every worker drained in time. On timeout the jobs
    /// still queued are abandoned, a warning is logged, and the workers that
    /// are still busy are detached rather than joined.
    ///
    /// Calling this again after the first call returns `true` immediately.
    pub fn shutdown_and_drain(&self, timeout: Duration) -> bool {
        let _entered = self.span.enter();

        // === Phase 0: Stop accepting new work ===
        let workers = {
            let mut state = self.state.lock();
            if !state.accepting {
                return true;
            }
            state.accepting = false;
            core::mem::take(&mut state.workers)
        };
        tracing::debug!("Refusing new work, draining {} workers", workers.len());

        // === Phase 1: Queue a shutdown request behind the pending work ===
        let (ack_tx, ack_rx) = bounded(workers.len());
        for _ in &workers {
            if self
                .tx
                .send(WorkRequest::Shutdown {
                    response: ack_tx.clone(),
                })
                .is_err()
            {
                tracing::error!("Failed to queue worker shutdown");
            }
        }
        drop(ack_tx);

        // === Phase 2: Wait for the acknowledgements ===
        // A timeout too large to fit an `Instant` waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut acknowledged = 0;
        while acknowledged < workers.len() {
            let ack = match deadline {
                Some(deadline) => ack_rx.recv_deadline(deadline),
                None => ack_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match ack {
                Ok(worker_id) => {
                    tracing::trace!("Worker {worker_id} shutdown acknowledged");
                    acknowledged += 1;
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::error!("Worker queue disconnected during drain");
                    break;
                }
            }
        }

        if acknowledged < workers.len() {
            // === Phase 3: Abandon whatever is still queued ===
            self.abandoned.store(true, Ordering::Release);
            tracing::warn!(
                "Graceful drain timed out after {timeout:?} ({} of {} workers still busy, {} requests queued)",
                workers.len() - acknowledged,
                workers.len(),
                self.rx.len(),
            );
            return false;
        }

        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked while stopping");
            }
        }
        tracing::debug!("Dispatcher drained");
        true
    }
}

impl Drop for Dispatcher {
    /// Lets the workers of a dispatcher that was never shut down exit once
    /// they drain the queue. Nothing is joined.
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.accepting {
            return;
        }
        state.accepting = false;

        // Nobody listens for the acknowledgement.
        let (ack_tx, _) = bounded(state.workers.len());
        for _ in &state.workers {
            let _ = self.tx.send(WorkRequest::Shutdown {
                response: ack_tx.clone(),
            });
        }
    }
}
