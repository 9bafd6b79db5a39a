//! `gerrit-relay daemon`: run the event-driven daemon in the foreground.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use relay_daemon::start_blocking;

#[derive(Args, Debug)]
pub struct DaemonArgs {}

impl DaemonArgs {
    pub fn run(self, config_path: &Path) -> Result<()> {
        let config = crate::load_config(config_path)?;
        start_blocking(config).context("daemon exited with error")
    }
}
