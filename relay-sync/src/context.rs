//! Shared, read-only state every pipeline runs against.

use std::path::PathBuf;
use std::sync::Arc;

use relay_core::{RelayConfig, Remote};

use crate::git::{GitCli, VersionControl};
use crate::remote::{RemoteExec, SshCli};

/// Configuration, both remotes, and the executors used to reach them.
/// Cloning is cheap; every field is behind an `Arc`.
#[derive(Clone)]
pub struct SyncContext {
    pub config: Arc<RelayConfig>,
    pub downstream: Arc<Remote>,
    pub upstream: Arc<Remote>,
    pub remote: Arc<dyn RemoteExec>,
    pub git: Arc<dyn VersionControl>,
}

impl SyncContext {
    pub fn new(
        config: RelayConfig,
        remote: Arc<dyn RemoteExec>,
        git: Arc<dyn VersionControl>,
    ) -> Self {
        let downstream = Arc::new(config.gerrit.remote());
        let upstream = Arc::new(config.upstream.clone());
        Self {
            config: Arc::new(config),
            downstream,
            upstream,
            remote,
            git,
        }
    }

    /// Production wiring: system `ssh` and `git`.
    pub fn system(config: RelayConfig) -> Self {
        let git = GitCli::for_remote(&config.gerrit.remote());
        Self::new(config, Arc::new(SshCli::new()), Arc::new(git))
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.config.daemon.scratch_root()
    }

    pub fn marker(&self) -> &str {
        &self.config.gerrit.was_here_indicator
    }
}
