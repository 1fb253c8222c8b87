use crate::WorkerId;
use core::fmt;
use crossbeam_channel::Sender;

/// A unit of work, handed the identity of whichever worker picks it up.
pub type Job = Box<dyn FnOnce(WorkerId) + Send + 'static>;

/// A message sent from the [`Dispatcher`] to its worker threads.
///
/// All workers consume one shared queue, so a request is taken by whichever
/// worker is free first.
///
/// [`Dispatcher`]: super::Dispatcher
pub enum WorkRequest {
    /// Run a job on the receiving worker.
    Run(Job),

    /// Request the receiving worker to exit once it has picked this up.
    ///
    /// - `response`: Channel used to acknowledge that the worker has stopped
    ///   taking work.
    Shutdown { response: Sender<WorkerId> },
}

impl fmt::Debug for WorkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(_) => f.write_str("Run(..)"),
            Self::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}
