//! # relay-sync
//!
//! Pipelines that act on the review services: propagation of approved
//! changes, configuration mirroring, project sync and provisioning.
//!
//! Everything here is synchronous and runs blocking child processes. The
//! daemon drives it from its blocking thread pool; the CLI calls it
//! directly. Remote commands go through [`RemoteExec`] and local git through
//! [`VersionControl`], both injected via [`SyncContext`].

pub mod config_mirror;
pub mod context;
pub mod error;
pub mod git;
pub mod pipeline;
pub mod project_sync;
pub mod propagate;
pub mod provision;
pub mod query;
pub mod remote;
pub mod scratch;

pub use config_mirror::{ConfigMirror, MirrorOutcome};
pub use context::SyncContext;
pub use error::SyncError;
pub use git::{GitCli, PushSpec, VersionControl};
pub use pipeline::{SyncReport, SyncScope};
pub use propagate::{PropagationOutcome, PropagationPipeline};
pub use provision::{is_already_exists, Presence};
pub use remote::{CommandOutput, RemoteExec, SshCli};
pub use scratch::ScratchDir;
