//! Fakes shared by the pipeline integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use relay_core::{RelayConfig, Remote};
use relay_sync::config_mirror::{GROUPS_FILE, META_CONFIG_PUSH, PROJECT_CONFIG_FILE};
use relay_sync::{CommandOutput, PushSpec, RemoteExec, SyncContext, SyncError, VersionControl};
use tempfile::TempDir;

type Responder = Box<dyn Fn(&str) -> CommandOutput + Send + Sync>;

/// Records every remote command and answers with a canned responder.
pub struct FakeRemote {
    pub calls: Mutex<Vec<(String, String)>>,
    responder: Responder,
}

impl FakeRemote {
    pub fn new(responder: impl Fn(&str) -> CommandOutput + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, command)| command.clone())
            .collect()
    }

    pub fn reviews(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with("gerrit review"))
            .collect()
    }
}

impl RemoteExec for FakeRemote {
    fn exec_once(&self, remote: &Remote, command: &str) -> Result<CommandOutput, SyncError> {
        self.calls
            .lock()
            .unwrap()
            .push((remote.host.clone(), command.to_string()));
        Ok((self.responder)(command))
    }
}

/// Records git calls and simulates a downstream `refs/meta/config` store.
#[derive(Default)]
pub struct FakeGit {
    pub calls: Mutex<Vec<String>>,
    /// Contents of `refs/meta/config` on downstream, by file name.
    pub meta_config: Mutex<BTreeMap<String, String>>,
    /// Refs advertised by each remote name.
    pub remote_refs: Mutex<BTreeMap<String, BTreeSet<String>>>,
    /// Operation name that fails, with the output it reports.
    pub fail: Mutex<Option<(String, String)>>,
}

impl FakeGit {
    pub fn failing(op: &str, output: &str) -> Self {
        let git = Self::default();
        *git.fail.lock().unwrap() = Some((op.to_string(), output.to_string()));
        git
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, op: &str, detail: String) -> Result<(), SyncError> {
        self.calls.lock().unwrap().push(format!("{op} {detail}").trim_end().to_string());
        match &*self.fail.lock().unwrap() {
            Some((failing, output)) if failing == op => Err(SyncError::Git {
                command: format!("git {op}"),
                output: output.clone(),
            }),
            _ => Ok(()),
        }
    }
}

impl VersionControl for FakeGit {
    fn init(&self, dir: &Path) -> Result<(), SyncError> {
        assert!(dir.is_dir(), "init outside an existing scratch directory");
        self.record("init", String::new())
    }

    fn clone_repo(&self, parent: &Path, source: &str, name: &str, bare: bool) -> Result<PathBuf, SyncError> {
        self.record("clone", format!("{source} {name} bare={bare}"))?;
        let repo = parent.join(name);
        fs::create_dir_all(&repo).unwrap();
        Ok(repo)
    }

    fn add_remote(&self, _dir: &Path, name: &str, url: &str) -> Result<(), SyncError> {
        self.record("remote", format!("{name} {url}"))
    }

    fn set_config(&self, _dir: &Path, key: &str, value: &str) -> Result<(), SyncError> {
        self.record("config", format!("{key} {value}"))
    }

    fn fetch(&self, _dir: &Path, remote: &str, refspecs: &[String]) -> Result<String, SyncError> {
        self.record("fetch", format!("{remote} {}", refspecs.join(" ")))?;
        Ok(String::new())
    }

    fn checkout(&self, dir: &Path, branch: &str, _create: bool) -> Result<(), SyncError> {
        self.record("checkout", branch.to_string())?;
        if branch == "meta/config" {
            for (name, contents) in self.meta_config.lock().unwrap().iter() {
                fs::write(dir.join(name), contents).unwrap();
            }
        }
        Ok(())
    }

    fn add(&self, _dir: &Path, paths: &[&str]) -> Result<(), SyncError> {
        self.record("add", paths.join(" "))
    }

    fn commit(&self, _dir: &Path, message: &str) -> Result<(), SyncError> {
        self.record("commit", message.to_string())
    }

    fn push(&self, dir: &Path, remote: &str, spec: &PushSpec) -> Result<String, SyncError> {
        let mut detail = remote.to_string();
        if spec.all {
            detail.push_str(" --all");
        }
        if spec.tags {
            detail.push_str(" --tags");
        }
        if spec.force {
            detail.push_str(" --force");
        }
        for refspec in &spec.refspecs {
            detail.push(' ');
            detail.push_str(refspec);
        }
        self.record("push", detail)?;

        if spec.refspecs.iter().any(|r| r == META_CONFIG_PUSH) {
            let mut store = self.meta_config.lock().unwrap();
            for name in [GROUPS_FILE, PROJECT_CONFIG_FILE] {
                if let Ok(contents) = fs::read_to_string(dir.join(name)) {
                    store.insert(name.to_string(), contents);
                }
            }
        }
        Ok(String::new())
    }

    fn list_remote_refs(&self, _dir: &Path, remote: &str, heads: bool, tags: bool) -> Result<BTreeSet<String>, SyncError> {
        self.record("ls-remote", format!("{remote} heads={heads} tags={tags}"))?;
        Ok(self
            .remote_refs
            .lock()
            .unwrap()
            .get(remote)
            .cloned()
            .unwrap_or_default())
    }
}

/// A context wired to the fakes, with scratch directories under `scratch`.
pub fn context(scratch: &TempDir, remote: Arc<FakeRemote>, git: Arc<FakeGit>) -> SyncContext {
    let mut config = RelayConfig::defaults().expect("defaults");
    config.gerrit.host = "review.internal".to_string();
    config.upstream.host = "review.example.org".to_string();
    config.git_config.name = "Gerrit Relay".to_string();
    config.git_config.email = "relay@example.com".to_string();
    config.daemon.scratch_dir = scratch.path().to_path_buf();
    SyncContext::new(config, remote, git)
}

pub fn ok(output: &str) -> CommandOutput {
    CommandOutput::new(0, output)
}

/// A query result with the given votes on patchset 1.
pub fn query_result(votes: &[(&str, i32)]) -> String {
    let approvals: Vec<String> = votes
        .iter()
        .map(|(label, value)| format!(r#"{{"type":"{label}","value":"{value}"}}"#))
        .collect();
    format!(
        "{{\"id\":\"X\",\"number\":\"4711\",\"patchSets\":[{{\"number\":\"1\",\"revision\":\"abc\",\"approvals\":[{}]}}]}}\n{{\"type\":\"stats\",\"rowCount\":1}}\n",
        approvals.join(",")
    )
}

pub fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
}
