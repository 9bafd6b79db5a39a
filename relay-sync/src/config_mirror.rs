//! Idempotent mirroring of group and access configuration into a project's
//! `refs/meta/config`.
//!
//! A mirrored file starts with the configured marker line. A file that
//! already contains the marker is never rewritten, so runs after the first
//! one are no-ops even when the source has changed since.

use std::fs;
use std::path::Path;

use crate::context::SyncContext;
use crate::error::{io_err, SyncError};
use crate::query::GroupEntry;
use crate::scratch::ScratchDir;

pub const GROUPS_FILE: &str = "groups";
pub const PROJECT_CONFIG_FILE: &str = "project.config";
pub const META_CONFIG_FETCH: &str = "refs/meta/config:refs/remotes/origin/meta/config";
pub const META_CONFIG_PUSH: &str = "meta/config:refs/meta/config";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// At least one file was rewritten and the result pushed.
    Pushed { rewritten: Vec<&'static str> },
    /// Every file already carried the marker.
    AlreadyMirrored,
}

/// Whether `path` exists and contains `marker`.
pub fn contains_marker(path: &Path, marker: &str) -> Result<bool, SyncError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.contains(marker)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Write `marker\n` followed by `body()` to `path` unless the file already
/// contains the marker. Returns whether the file was written.
pub fn ensure_marked<F>(path: &Path, marker: &str, body: F) -> Result<bool, SyncError>
where
    F: FnOnce() -> Result<String, SyncError>,
{
    if contains_marker(path, marker)? {
        tracing::debug!(path = %path.display(), "marker present");
        return Ok(false);
    }
    let contents = format!("{marker}\n{}", body()?);
    fs::write(path, contents).map_err(|e| io_err(path, e))?;
    Ok(true)
}

/// One `<uuid>\t<name>` line per group.
pub fn groups_body(groups: &[GroupEntry]) -> String {
    groups
        .iter()
        .map(|g| format!("{}\t{}\n", g.uuid, g.name))
        .collect()
}

pub struct ConfigMirror<'a> {
    ctx: &'a SyncContext,
}

impl<'a> ConfigMirror<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Mirror `groups` and the contents of `config_source` into `project`
    /// on downstream.
    pub fn mirror(
        &self,
        project: &str,
        groups: &[GroupEntry],
        config_source: &Path,
    ) -> Result<MirrorOutcome, SyncError> {
        let git = &self.ctx.git;
        let marker = self.ctx.marker();
        let scratch = ScratchDir::create(&self.ctx.scratch_root(), &format!("config-{project}"))?;
        let dir = scratch.path();

        git.init(dir)?;
        git.add_remote(dir, "origin", &self.ctx.downstream.project_url(project))?;
        git.fetch(dir, "origin", &[META_CONFIG_FETCH.to_string()])?;
        git.checkout(dir, "meta/config", false)?;

        let mut rewritten = Vec::new();
        if ensure_marked(&dir.join(GROUPS_FILE), marker, || Ok(groups_body(groups)))? {
            rewritten.push(GROUPS_FILE);
        }
        let source_body = || fs::read_to_string(config_source).map_err(|e| io_err(config_source, e));
        if ensure_marked(&dir.join(PROJECT_CONFIG_FILE), marker, source_body)? {
            rewritten.push(PROJECT_CONFIG_FILE);
        }

        if rewritten.is_empty() {
            tracing::info!(project, "configuration already mirrored");
            return Ok(MirrorOutcome::AlreadyMirrored);
        }

        git.set_identity(dir, &self.ctx.config.git_config)?;
        git.add(dir, &[GROUPS_FILE, PROJECT_CONFIG_FILE])?;
        git.commit(dir, &format!("Setting up {project}"))?;
        git.push(
            dir,
            "origin",
            &crate::git::PushSpec::refspecs([META_CONFIG_PUSH]),
        )?;
        tracing::info!(project, files = ?rewritten, "mirrored configuration");
        Ok(MirrorOutcome::Pushed { rewritten })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const MARKER: &str = "### Setup by gerrit-sync ###";

    #[test]
    fn unmarked_file_is_rewritten_once() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("groups");
        fs::write(&path, "old contents\n").expect("seed");

        assert!(ensure_marked(&path, MARKER, || Ok("u1\tadmins\n".to_string())).expect("first"));
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            format!("{MARKER}\nu1\tadmins\n")
        );

        let wrote = ensure_marked(&path, MARKER, || panic!("body must not be built")).expect("second");
        assert!(!wrote);
    }

    #[test]
    fn missing_file_is_created() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("project.config");
        assert!(!contains_marker(&path, MARKER).expect("absent"));
        assert!(ensure_marked(&path, MARKER, || Ok(String::new())).expect("write"));
        assert!(contains_marker(&path, MARKER).expect("present"));
    }

    #[test]
    fn marker_anywhere_counts() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("project.config");
        fs::write(&path, format!("[project]\n# {MARKER}\n")).expect("seed");
        assert!(!ensure_marked(&path, MARKER, || Ok(String::new())).expect("noop"));
    }

    #[test]
    fn groups_body_is_uuid_tab_name() {
        let groups = vec![GroupEntry {
            name: "core".to_string(),
            uuid: "abc".to_string(),
            description: None,
            owner: "Administrators".to_string(),
            owner_uuid: "def".to_string(),
        }];
        assert_eq!(groups_body(&groups), "abc\tcore\n");
    }
}
