//! `gerrit-relay setup`: one-time site set-up of groups, accounts and the
//! `All-Projects` configuration.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use relay_daemon::logging;
use relay_sync::pipeline;
use relay_sync::{MirrorOutcome, SyncContext};

use super::sync::print_report;

#[derive(Args, Debug)]
pub struct SetupArgs {}

impl SetupArgs {
    pub fn run(self, config_path: &Path) -> Result<()> {
        let config = crate::load_config(config_path)?;
        logging::init_stderr(&config.logging.level);

        let ctx = SyncContext::system(config);
        let (report, outcome) = pipeline::setup(&ctx).context("setup failed")?;
        print_report(&report);
        match outcome {
            MirrorOutcome::Pushed { rewritten } => println!(
                "✓ {} configuration pushed ({})",
                pipeline::ALL_PROJECTS,
                rewritten.join(", ")
            ),
            MirrorOutcome::AlreadyMirrored => {
                println!("✓ {} configuration already mirrored", pipeline::ALL_PROJECTS)
            }
        }
        Ok(())
    }
}
