//! Mirroring a project's source repository into downstream.

use std::collections::BTreeSet;

use relay_core::ProjectSpec;

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::git::PushSpec;
use crate::scratch::ScratchDir;

/// Name of the downstream remote inside the mirror clone.
pub const REVIEW_REMOTE: &str = "gerrit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSyncOutcome {
    /// No source, or neither heads nor tags enabled.
    Skipped,
    Synced {
        /// Refs that exist only on downstream and are not preserved.
        stale: BTreeSet<String>,
        /// Whether `stale` was deleted.
        pruned: bool,
    },
}

/// Refs on `mirror` absent from `origin`, less those preserved by
/// `preserve_prefix`.
///
/// A ref is preserved when it is `refs/heads/<prefix>…` or
/// `refs/tags/<prefix>…`. Bare names are compared as given, so the prefix
/// only protects fully qualified refs.
pub fn prune_set(
    origin: &BTreeSet<String>,
    mirror: &BTreeSet<String>,
    preserve_prefix: Option<&str>,
) -> BTreeSet<String> {
    let preserved = |name: &str| match preserve_prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => ["refs/heads/", "refs/tags/"].iter().any(|ns| {
            name.strip_prefix(*ns)
                .is_some_and(|short| short.starts_with(prefix))
        }),
        None => false,
    };
    mirror
        .difference(origin)
        .filter(|name| !preserved(name.as_str()))
        .cloned()
        .collect()
}

/// Push the branches and tags of `spec.source` into the downstream project
/// and delete refs the source no longer has.
pub fn sync_source(ctx: &SyncContext, spec: &ProjectSpec) -> Result<SourceSyncOutcome, SyncError> {
    let Some(source) = spec.source.as_deref() else {
        return Ok(SourceSyncOutcome::Skipped);
    };
    if !spec.heads && !spec.tags {
        tracing::debug!(project = %spec.name, "heads and tags disabled");
        return Ok(SourceSyncOutcome::Skipped);
    }

    let git = &ctx.git;
    let scratch = ScratchDir::create(&ctx.scratch_root(), &format!("source-{}", spec.name))?;
    let repo = git.clone_repo(scratch.path(), source, "mirror", true)?;
    git.add_remote(&repo, REVIEW_REMOTE, &ctx.downstream.project_url(&spec.name))?;

    if spec.heads {
        git.push(&repo, REVIEW_REMOTE, &PushSpec::all_branches().forced(spec.force))?;
    }
    if spec.tags {
        git.push(&repo, REVIEW_REMOTE, &PushSpec::all_tags().forced(spec.force))?;
    }

    let origin = git.list_remote_refs(&repo, "origin", spec.heads, spec.tags)?;
    let mirror = git.list_remote_refs(&repo, REVIEW_REMOTE, spec.heads, spec.tags)?;
    let stale = prune_set(&origin, &mirror, spec.preserve_prefix.as_deref());

    let pruned = spec.prune && !stale.is_empty();
    if pruned {
        let deletions = stale.iter().map(|name| format!(":{name}"));
        git.push(&repo, REVIEW_REMOTE, &PushSpec::refspecs(deletions))?;
        tracing::info!(project = %spec.name, refs = ?stale, "pruned stale refs");
    } else if !stale.is_empty() {
        tracing::info!(project = %spec.name, refs = ?stale, "stale refs kept; pruning disabled");
    }

    tracing::info!(project = %spec.name, source, "source synced");
    Ok(SourceSyncOutcome::Synced { stale, pruned })
}
