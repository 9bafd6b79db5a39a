//! gerrit-relay core library: configuration, decoded events, approval policy.
//!
//! - [`config`]: typed configuration merged over built-in defaults
//! - [`event`]: stream-events records as tagged variants
//! - [`policy`]: max-with-block label evaluation
//! - [`numbers`]: lenient number decoding for Gerrit JSON
//! - [`types`]: newtypes shared by every crate
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod event;
pub mod numbers;
pub mod policy;
pub mod types;

pub use config::{
    DaemonConfig, DownstreamConfig, GitIdentity, GroupSpec, LogFormat, LoggingConfig, ProjectSpec,
    RelayConfig, Remote, UserSpec,
};
pub use error::ConfigError;
pub use event::{Change, CommentAdded, Event, PatchSet, RefUpdate, RefUpdated};
pub use policy::{Assessment, Label, Vote, READY_TOKEN};
pub use types::{ChangeId, ProjectName};
