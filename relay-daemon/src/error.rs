use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime and its logging set-up.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] relay_core::ConfigError),

    #[error("sync error: {0}")]
    Sync(#[from] relay_sync::SyncError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("{task} task join failure: {reason}")]
    Join { task: &'static str, reason: String },

    #[error("logging set-up failed: {0}")]
    Logging(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
