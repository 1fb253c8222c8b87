//! Worker pool and connection pinning.
//!
//! ## Structure
//!
//! - `dispatcher` - Bounded set of worker threads draining a shared queue.
//! - `registry` - One lazily created connection per worker.
//! - `pooled` - The [`PooledConnection`] facade tying both together.

mod dispatcher;
mod pooled;
mod registry;
mod request;
mod worker;

pub use dispatcher::Dispatcher;
pub use pooled::PooledConnection;
pub use registry::{Pinned, Registry};
pub use request::Job;
