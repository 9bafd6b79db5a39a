//! Local git operations.
//!
//! [`VersionControl`] is the seam the pipelines drive; [`GitCli`] runs the
//! system `git` binary with an explicit working directory and never changes
//! the process's current directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use relay_core::{GitIdentity, Remote};

use crate::error::SyncError;

/// What a push sends.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PushSpec {
    /// `--all`: every local branch.
    pub all: bool,
    /// `--tags`: every local tag.
    pub tags: bool,
    pub force: bool,
    pub refspecs: Vec<String>,
}

impl PushSpec {
    pub fn all_branches() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    pub fn all_tags() -> Self {
        Self {
            tags: true,
            ..Self::default()
        }
    }

    pub fn refspecs<I, S>(refspecs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            refspecs: refspecs.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.all {
            args.push("--all".to_string());
        }
        if self.tags {
            args.push("--tags".to_string());
        }
        if self.force {
            args.push("--force".to_string());
        }
        args.extend(self.refspecs.iter().cloned());
        args
    }
}

/// Git operations the pipelines need. Every method takes the repository
/// directory explicitly.
pub trait VersionControl: Send + Sync {
    fn init(&self, dir: &Path) -> Result<(), SyncError>;

    /// Clone `source` into `parent/name` and return the new repository path.
    fn clone_repo(
        &self,
        parent: &Path,
        source: &str,
        name: &str,
        bare: bool,
    ) -> Result<PathBuf, SyncError>;

    fn add_remote(&self, dir: &Path, name: &str, url: &str) -> Result<(), SyncError>;

    fn set_config(&self, dir: &Path, key: &str, value: &str) -> Result<(), SyncError>;

    fn fetch(&self, dir: &Path, remote: &str, refspecs: &[String]) -> Result<String, SyncError>;

    /// Check out `branch`, creating it at `HEAD` when `create` is set.
    fn checkout(&self, dir: &Path, branch: &str, create: bool) -> Result<(), SyncError>;

    fn add(&self, dir: &Path, paths: &[&str]) -> Result<(), SyncError>;

    fn commit(&self, dir: &Path, message: &str) -> Result<(), SyncError>;

    fn push(&self, dir: &Path, remote: &str, spec: &PushSpec) -> Result<String, SyncError>;

    /// Full ref names (`refs/heads/…`, `refs/tags/…`) advertised by `remote`.
    fn list_remote_refs(
        &self,
        dir: &Path,
        remote: &str,
        heads: bool,
        tags: bool,
    ) -> Result<BTreeSet<String>, SyncError>;

    /// Set the committer identity; empty fields are left alone.
    fn set_identity(&self, dir: &Path, identity: &GitIdentity) -> Result<(), SyncError> {
        if !identity.name.is_empty() {
            self.set_config(dir, "user.name", &identity.name)?;
        }
        if !identity.email.is_empty() {
            self.set_config(dir, "user.email", &identity.email)?;
        }
        Ok(())
    }
}

/// Parse `git ls-remote` output into ref names, dropping peeled tag entries.
pub fn parse_ls_remote(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter(|name| !name.ends_with("^{}"))
        .map(str::to_string)
        .collect()
}

/// [`VersionControl`] backed by the system `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    ssh_command: Option<String>,
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authenticate ssh transports with the identity configured for `remote`.
    pub fn for_remote(remote: &Remote) -> Self {
        let ssh_command = remote.key_filename.as_ref().map(|key| {
            format!(
                "ssh -i {} -o BatchMode=yes -o ConnectTimeout={}",
                crate::remote::quote(&key.display().to_string()),
                remote.timeout
            )
        });
        Self { ssh_command }
    }

    fn command(&self, dir: &Path) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(dir).env("GIT_TERMINAL_PROMPT", "0");
        if let Some(ssh) = &self.ssh_command {
            cmd.env("GIT_SSH_COMMAND", ssh);
        }
        cmd
    }

    /// Run git in `dir`, returning combined stdout and stderr.
    fn run<S: AsRef<str>>(&self, dir: &Path, args: &[S]) -> Result<String, SyncError> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        let rendered = format!("git {}", args.join(" "));
        let out = self
            .command(dir)
            .args(&args)
            .output()
            .map_err(|source| SyncError::Spawn {
                program: "git".to_string(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&out.stderr));
        if !out.status.success() {
            return Err(SyncError::Git {
                command: rendered,
                output: combined,
            });
        }
        tracing::debug!(dir = %dir.display(), command = %rendered, "git ok");
        Ok(combined)
    }
}

impl VersionControl for GitCli {
    fn init(&self, dir: &Path) -> Result<(), SyncError> {
        self.run(dir, &["init", "--quiet"]).map(drop)
    }

    fn clone_repo(
        &self,
        parent: &Path,
        source: &str,
        name: &str,
        bare: bool,
    ) -> Result<PathBuf, SyncError> {
        let mut args = vec!["clone", "--quiet"];
        if bare {
            args.push("--bare");
        }
        args.extend([source, name]);
        self.run(parent, &args)?;
        Ok(parent.join(name))
    }

    fn add_remote(&self, dir: &Path, name: &str, url: &str) -> Result<(), SyncError> {
        self.run(dir, &["remote", "add", name, url]).map(drop)
    }

    fn set_config(&self, dir: &Path, key: &str, value: &str) -> Result<(), SyncError> {
        self.run(dir, &["config", key, value]).map(drop)
    }

    fn fetch(&self, dir: &Path, remote: &str, refspecs: &[String]) -> Result<String, SyncError> {
        let mut args = vec!["fetch".to_string(), remote.to_string()];
        args.extend(refspecs.iter().cloned());
        self.run(dir, &args)
    }

    fn checkout(&self, dir: &Path, branch: &str, create: bool) -> Result<(), SyncError> {
        if create {
            self.run(dir, &["checkout", "--quiet", "-b", branch]).map(drop)
        } else {
            self.run(dir, &["checkout", "--quiet", branch]).map(drop)
        }
    }

    fn add(&self, dir: &Path, paths: &[&str]) -> Result<(), SyncError> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run(dir, &args).map(drop)
    }

    fn commit(&self, dir: &Path, message: &str) -> Result<(), SyncError> {
        self.run(dir, &["commit", "--quiet", "-m", message]).map(drop)
    }

    fn push(&self, dir: &Path, remote: &str, spec: &PushSpec) -> Result<String, SyncError> {
        let mut args = vec!["push".to_string(), remote.to_string()];
        args.extend(spec.args());
        self.run(dir, &args)
    }

    fn list_remote_refs(
        &self,
        dir: &Path,
        remote: &str,
        heads: bool,
        tags: bool,
    ) -> Result<BTreeSet<String>, SyncError> {
        let mut args = vec!["ls-remote"];
        if heads {
            args.push("--heads");
        }
        if tags {
            args.push("--tags");
        }
        args.push(remote);
        let output = self.run(dir, &args)?;
        Ok(parse_ls_remote(&output))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn ls_remote_output_parses_to_ref_names() {
        let output = "\
1111111111111111111111111111111111111111\trefs/heads/main
2222222222222222222222222222222222222222\trefs/tags/v1
3333333333333333333333333333333333333333\trefs/tags/v1^{}

";
        let refs = parse_ls_remote(output);
        assert_eq!(
            refs.into_iter().collect::<Vec<_>>(),
            vec!["refs/heads/main".to_string(), "refs/tags/v1".to_string()]
        );
    }

    #[test]
    fn push_spec_renders_flags_before_refspecs() {
        assert_eq!(PushSpec::all_branches().forced(true).args(), ["--all", "--force"]);
        assert_eq!(PushSpec::all_tags().args(), ["--tags"]);
        assert_eq!(
            PushSpec::refspecs([":refs/heads/stale"]).args(),
            [":refs/heads/stale"]
        );
    }

    #[test]
    fn for_remote_sets_ssh_command_only_with_key() {
        let mut remote = Remote {
            host: "h".to_string(),
            port: 29418,
            username: "u".to_string(),
            key_filename: None,
            timeout: 10,
            keepalive: 60,
        };
        assert!(GitCli::for_remote(&remote).ssh_command.is_none());
        remote.key_filename = Some(PathBuf::from("/keys/id_rsa"));
        let ssh = GitCli::for_remote(&remote).ssh_command.expect("ssh command");
        assert!(ssh.contains("-i /keys/id_rsa"));
    }

    #[test]
    fn failing_git_reports_combined_output() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let missing = dir.path().join("not-a-repo");
        std::fs::create_dir_all(&missing).expect("mkdir");
        match GitCli::new().checkout(&missing, "main", false) {
            Err(SyncError::Git { command, .. }) => assert!(command.starts_with("git checkout")),
            // No git on the test host.
            Err(SyncError::Spawn { .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
