//! Error types for relay-sync.

use std::path::PathBuf;

use thiserror::Error;

use relay_core::ConfigError;

/// All errors that can arise from pipeline and provisioning operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A local I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A helper program (`ssh`, `git`) could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A local `git` invocation exited non-zero. `output` holds its combined
    /// stdout and stderr.
    #[error("`{command}` failed: {output}")]
    Git { command: String, output: String },

    /// A remote command exited non-zero where success was required.
    #[error("remote command `{command}` exited with {status}: {output}")]
    Remote {
        command: String,
        status: i32,
        output: String,
    },

    /// A remote query answered with something unusable.
    #[error("query for {subject} failed: {reason}")]
    Query { subject: String, reason: String },

    /// Configuration needed by the operation is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether this error came out of a git or ssh child process, as opposed
    /// to local filesystem or configuration trouble.
    pub fn is_transfer(&self) -> bool {
        matches!(self, SyncError::Git { .. } | SyncError::Spawn { .. })
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
