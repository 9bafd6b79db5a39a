//! Daemon runtime: event ingestion, scheduling and the worker pool.

mod context;
mod error;
pub mod guard;
pub mod ingest;
pub mod log_rotation;
pub mod logging;
pub mod pool;
mod runtime;
pub mod scheduler;

pub use context::AppContext;
pub use error::DaemonError;
pub use ingest::{EventIngestor, SshStreamConnector, StreamConnector};
pub use pool::{Job, WorkerPool};
pub use runtime::{route, run, spawn_signal_listener, start_blocking, Dispatch, Feed};
pub use scheduler::Scheduler;
