//! Remote command execution on a review service.
//!
//! Every Gerrit administrative or query command goes through [`RemoteExec`].
//! Production code uses [`SshCli`], which shells out to the system `ssh`
//! client in batch mode; tests substitute a recorder.

use std::borrow::Cow;
use std::process::Command;

use relay_core::Remote;

use crate::error::SyncError;

/// Exit status and output of one remote command.
///
/// `output` is standard output when the command succeeded and standard error
/// otherwise, so callers can quote it verbatim in review messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn new(status: i32, output: impl Into<String>) -> Self {
        Self {
            status,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Opens a fresh connection, runs one command and closes the connection.
pub trait RemoteExec: Send + Sync {
    fn exec_once(&self, remote: &Remote, command: &str) -> Result<CommandOutput, SyncError>;
}

/// Quote one argument for the remote shell.
pub fn quote(arg: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(arg)).into_owned()
}

/// Arguments for `ssh` that connect to `remote` and run `remote_command`.
///
/// Host keys are accepted on first contact and verified on later ones.
pub fn ssh_args(remote: &Remote, remote_command: &str) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        remote.port.to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", remote.timeout),
        "-o".to_string(),
        format!("ServerAliveInterval={}", remote.keepalive),
    ];
    if let Some(key) = &remote.key_filename {
        args.push("-i".to_string());
        args.push(key.display().to_string());
    }
    args.push(format!("{}@{}", remote.username, remote.host));
    args.push(remote_command.to_string());
    args
}

/// [`RemoteExec`] backed by the system `ssh` binary.
#[derive(Debug, Clone)]
pub struct SshCli {
    program: String,
}

impl SshCli {
    pub fn new() -> Self {
        Self {
            program: "ssh".to_string(),
        }
    }

    /// Use a different client binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SshCli {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteExec for SshCli {
    fn exec_once(&self, remote: &Remote, command: &str) -> Result<CommandOutput, SyncError> {
        tracing::debug!(host = %remote.host, command, "running remote command");
        let out = Command::new(&self.program)
            .args(ssh_args(remote, command))
            .output()
            .map_err(|source| SyncError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Killed by a signal: no exit code.
        let status = out.status.code().unwrap_or(-1);
        let stream = if out.status.success() {
            &out.stdout
        } else {
            &out.stderr
        };
        Ok(CommandOutput::new(
            status,
            String::from_utf8_lossy(stream).into_owned(),
        ))
    }
}

/// Post `message` as a review comment on `revision`.
///
/// A refused comment is logged and otherwise ignored; only a failure to reach
/// the remote at all is returned.
pub fn post_review(
    exec: &dyn RemoteExec,
    remote: &Remote,
    revision: &str,
    message: &str,
) -> Result<(), SyncError> {
    let command = format!("gerrit review -m {} {}", quote(message), quote(revision));
    let result = exec.exec_once(remote, &command)?;
    if !result.success() {
        tracing::warn!(
            host = %remote.host,
            revision,
            status = result.status,
            output = %result.output.trim_end(),
            "review comment was refused"
        );
    }
    Ok(())
}
