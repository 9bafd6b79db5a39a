//! `gerrit-relay send-upstream`: replay one comment-added event.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Args;

use relay_core::Event;
use relay_daemon::logging;
use relay_sync::{PropagationOutcome, PropagationPipeline, SyncContext};

#[derive(Args, Debug)]
pub struct SendUpstreamArgs {
    /// File holding the event JSON; `-` or omitted reads stdin.
    pub event: Option<PathBuf>,
}

impl SendUpstreamArgs {
    fn read_event(&self) -> Result<String> {
        match self.event.as_deref() {
            Some(path) if path != Path::new("-") => fs::read_to_string(path)
                .with_context(|| format!("failed to read event from {}", path.display())),
            _ => {
                let mut buf = String::new();
                io::stdin()
                    .read_to_string(&mut buf)
                    .context("failed to read event from stdin")?;
                Ok(buf)
            }
        }
    }

    pub fn run(self, config_path: &Path) -> Result<()> {
        let config = crate::load_config(config_path)?;
        logging::init_stderr(&config.logging.level);

        let raw = self.read_event()?;
        let event = Event::decode(raw.trim()).context("event is not valid JSON")?;
        let kind = event.kind();
        let Event::CommentAdded(comment) = event else {
            bail!("expected a comment-added event, got {kind}");
        };

        tracing::info!(change = %comment.change.id, "replaying comment-added event");
        let started = Instant::now();
        let outcome = PropagationPipeline::new(SyncContext::system(config))
            .run(&comment)
            .with_context(|| format!("send upstream failed for change {}", comment.change.id))?;

        match outcome {
            PropagationOutcome::NotIndicated => {
                println!("· comment does not request upstream, nothing to do")
            }
            PropagationOutcome::Rejected { unmet } => {
                println!("✗ not approved for upstream: {}", unmet.join(", "))
            }
            PropagationOutcome::Sent { url } => println!("✓ sent to upstream: {url}"),
            PropagationOutcome::TransferFailed { output } => {
                println!("✗ could not send to upstream:\n{}", output.trim_end())
            }
        }
        println!(
            "send upstream run finished in {:.1}s",
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }
}
