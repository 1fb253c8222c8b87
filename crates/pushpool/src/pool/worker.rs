use super::request::WorkRequest;
use crate::WorkerId;
use crossbeam_channel::Receiver;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::Span;

/// Worker thread body responsible for processing [`WorkRequest`] messages.
///
/// Each worker pulls from the dispatcher's shared queue and runs one job at a
/// time until it receives a shutdown request or the queue disconnects.
///
/// # Arguments
///
/// - `worker_id`: Slot of this worker, handed to every job it runs.
/// - `rx`: Shared queue through which [`WorkRequest`]s are received.
/// - `abandoned`: Set once a drain timed out. Jobs still queued after that are
///   dropped without running.
/// - `span`: The pool's span, entered for the lifetime of the worker.
///
/// # Request Types
///
/// - [`WorkRequest::Run`]: Runs the job. A panicking job is logged and the
///   worker carries on, keeping the connection it already created.
/// - [`WorkRequest::Shutdown`]: Acknowledges and stops.
pub fn worker_loop(
    worker_id: WorkerId,
    rx: Receiver<WorkRequest>,
    abandoned: Arc<AtomicBool>,
    span: Span,
) {
    let _entered = span.enter();
    tracing::trace!("Worker {worker_id} started");

    while let Ok(work) = rx.recv() {
        match work {
            WorkRequest::Run(job) => {
                if abandoned.load(Ordering::Acquire) {
                    tracing::trace!("Worker {worker_id} dropping abandoned job");
                    continue;
                }
                if panic::catch_unwind(AssertUnwindSafe(|| job(worker_id))).is_err() {
                    tracing::error!("Worker {worker_id} job panicked");
                }
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                // The dispatcher stops listening once its drain times out.
                if response.send(worker_id).is_err() {
                    tracing::trace!("Worker {worker_id} shutdown acknowledgement unobserved");
                }
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
