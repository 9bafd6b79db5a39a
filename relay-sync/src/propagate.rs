//! Mirroring an approved downstream change to upstream.
//!
//! A run walks gate → fetch → evaluate → transfer → report. The scratch
//! repository used for the transfer lives only as long as the run.

use std::path::Path;

use relay_core::{policy, CommentAdded, READY_TOKEN};

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::git::PushSpec;
use crate::query::{change_query_command, parse_change_record};
use crate::remote::post_review;
use crate::scratch::ScratchDir;

/// How a propagation run ended. Every variant except
/// [`PropagationOutcome::NotIndicated`] posted a review comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationOutcome {
    /// The comment did not ask for mirroring.
    NotIndicated,
    /// The change failed the approval policy.
    Rejected { unmet: Vec<String> },
    /// The change was pushed for review upstream.
    Sent { url: String },
    /// A transfer command failed; its output was posted.
    TransferFailed { output: String },
}

/// `refs/changes/<nn>/<number>/<patchset>`, `nn` being the last two digits
/// of the change number.
pub fn change_ref(number: u64, patchset: u64) -> String {
    format!("refs/changes/{:02}/{number}/{patchset}", number % 100)
}

pub fn local_ref(number: u64, patchset: u64) -> String {
    format!("refs/heads/relay/{number}-{patchset}")
}

/// `refs/for/<branch>`, with `%topic=<topic>` when a topic is set.
pub fn review_target(branch: &str, topic: Option<&str>) -> String {
    match topic.filter(|t| !t.is_empty()) {
        Some(topic) => format!("refs/for/{branch}%topic={topic}"),
        None => format!("refs/for/{branch}"),
    }
}

pub fn upstream_url(host: &str, change: &str) -> String {
    format!("https://{host}/#q,{change},n,z")
}

pub fn rejection_message(unmet: &[String]) -> String {
    format!(
        "Could not send to upstream: One or more labels not approved: {}.",
        unmet.join(", ")
    )
}

pub fn transfer_failure_message(output: &str) -> String {
    format!("<pre>Could not send to upstream:\n{output}</pre>")
}

pub struct PropagationPipeline {
    ctx: SyncContext,
}

impl PropagationPipeline {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    pub fn run(&self, event: &CommentAdded) -> Result<PropagationOutcome, SyncError> {
        let change = &event.change.id;
        if !event.is_indicated(READY_TOKEN) {
            tracing::debug!(change = %change, "upstream not indicated");
            return Ok(PropagationOutcome::NotIndicated);
        }

        let downstream = &*self.ctx.downstream;
        let revision = &event.patch_set.revision;

        let command = change_query_command(change);
        let result = self.ctx.remote.exec_once(downstream, &command)?;
        if !result.success() {
            return Err(SyncError::Query {
                subject: format!("change {change}"),
                reason: result.output.trim_end().to_string(),
            });
        }
        let record = parse_change_record(&result.output, change, event.patch_set.number)?;
        tracing::debug!(change = %change, votes = record.votes.len(), "fetched approvals");

        let assessment = policy::assess(&self.ctx.config.daemon.required_labels, &record.votes);
        if !assessment.approved() {
            tracing::info!(
                change = %change,
                unmet = ?assessment.unmet,
                "change not approved for upstream"
            );
            post_review(
                self.ctx.remote.as_ref(),
                downstream,
                revision,
                &rejection_message(&assessment.unmet),
            )?;
            return Ok(PropagationOutcome::Rejected {
                unmet: assessment.unmet,
            });
        }

        let number = event.change.number.or(record.number);
        let scratch = ScratchDir::create(&self.ctx.scratch_root(), &format!("propagate-{change}"))?;
        tracing::info!(change = %change, dir = %scratch.path().display(), "sending to upstream");

        let outcome = match number {
            Some(number) => match self.transfer(event, number, scratch.path()) {
                Ok(()) => {
                    let url = upstream_url(&self.ctx.upstream.host, &change.0);
                    PropagationOutcome::Sent { url }
                }
                Err(SyncError::Git { output, .. }) => PropagationOutcome::TransferFailed { output },
                Err(e) if e.is_transfer() => PropagationOutcome::TransferFailed {
                    output: e.to_string(),
                },
                Err(e) => return Err(e),
            },
            None => PropagationOutcome::TransferFailed {
                output: format!("change number of {change} is unknown"),
            },
        };

        match &outcome {
            PropagationOutcome::Sent { url } => {
                tracing::info!(change = %change, url = %url, "sent to upstream");
                post_review(
                    self.ctx.remote.as_ref(),
                    downstream,
                    revision,
                    &format!("Sent to upstream: {url}"),
                )?;
            }
            PropagationOutcome::TransferFailed { output } => {
                tracing::error!(change = %change, output = %output.trim_end(), "unable to send to upstream");
                post_review(
                    self.ctx.remote.as_ref(),
                    downstream,
                    revision,
                    &transfer_failure_message(output),
                )?;
            }
            _ => {}
        }
        Ok(outcome)
    }

    fn transfer(&self, event: &CommentAdded, number: u64, dir: &Path) -> Result<(), SyncError> {
        let git = &self.ctx.git;
        let project = event.change.project.as_str();
        let patchset = event.patch_set.number;

        git.init(dir)?;
        git.add_remote(dir, "downstream", &self.ctx.downstream.project_url(project))?;
        git.add_remote(dir, "upstream", &self.ctx.upstream.project_url(project))?;
        git.set_identity(dir, &self.ctx.config.git_config)?;

        let local = local_ref(number, patchset);
        git.fetch(
            dir,
            "downstream",
            &[format!("{}:{local}", change_ref(number, patchset))],
        )?;
        let target = review_target(&event.change.branch, event.change.topic.as_deref());
        git.push(dir, "upstream", &PushSpec::refspecs([format!("{local}:{target}")]))?;
        Ok(())
    }
}
