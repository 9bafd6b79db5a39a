//! Size-based rotation for the daemon log file.
//!
//! With `keep: 3` an oversized `gerrit-relay.log` shifts through
//! `gerrit-relay.log.1` … `gerrit-relay.log.3`; whatever was in `.3` is
//! dropped. With `keep: 0` the live file is truncated in place.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use relay_core::LoggingConfig;

/// When to rotate and how many old copies survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub keep: usize,
}

impl RotationPolicy {
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            keep: config.keep,
        }
    }

    fn is_due(&self, path: &Path) -> io::Result<bool> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.len() >= self.max_bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Rotate `path` once it has grown to `max_bytes`. Returns whether
    /// anything moved.
    pub fn rotate(&self, path: &Path) -> io::Result<bool> {
        if !self.is_due(path)? {
            return Ok(false);
        }

        if self.keep > 0 {
            remove_if_exists(&copy_path(path, self.keep))?;
            for generation in (1..self.keep).rev() {
                rename_if_exists(&copy_path(path, generation), &copy_path(path, generation + 1))?;
            }
            fs::rename(path, copy_path(path, 1))?;
        }

        // Writers reopen by name, so an empty file is all they need.
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(true)
    }
}

/// Apply `policy` to `path` and log the outcome.
pub fn rotate_log(path: &Path, policy: RotationPolicy) {
    match policy.rotate(path) {
        Ok(false) => {}
        Ok(true) => tracing::info!(
            path = %path.display(),
            keep = policy.keep,
            "log file rotated"
        ),
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "log rotation failed"),
    }
}

/// `gerrit-relay.log` with generation 2 is `gerrit-relay.log.2`.
fn copy_path(path: &Path, generation: usize) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{generation}"));
    path.with_file_name(name)
}

fn rename_if_exists(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    const POLICY: RotationPolicy = RotationPolicy {
        max_bytes: 64,
        keep: 3,
    };

    fn log_in(dir: &TempDir) -> PathBuf {
        dir.path().join("gerrit-relay.log")
    }

    fn fill(path: &Path, policy: RotationPolicy, tag: &str) {
        let body = tag.repeat(policy.max_bytes as usize / tag.len() + 1);
        fs::write(path, body).unwrap();
    }

    #[test]
    fn policy_follows_logging_section() {
        let config = relay_core::RelayConfig::defaults().unwrap();
        let policy = RotationPolicy::from_config(&config.logging);
        assert_eq!(policy.max_bytes, config.logging.max_bytes);
        assert_eq!(policy.keep, config.logging.keep);
    }

    #[rstest]
    #[case::absent(None)]
    #[case::under_threshold(Some("short\n"))]
    fn nothing_to_rotate(#[case] contents: Option<&str>) {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        if let Some(contents) = contents {
            fs::write(&log, contents).unwrap();
        }
        assert!(!POLICY.rotate(&log).unwrap());
        assert!(!copy_path(&log, 1).exists());
    }

    #[test]
    fn generations_shift_and_the_oldest_is_dropped() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        for tag in ["a", "b", "c", "d"] {
            fill(&log, POLICY, tag);
            assert!(POLICY.rotate(&log).unwrap());
        }

        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        let first = |g| fs::read_to_string(copy_path(&log, g)).unwrap().chars().next();
        assert_eq!(first(1), Some('d'));
        assert_eq!(first(2), Some('c'));
        assert_eq!(first(3), Some('b'));
        assert!(!copy_path(&log, 4).exists());
    }

    #[test]
    fn keep_zero_truncates_in_place() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        let policy = RotationPolicy { keep: 0, ..POLICY };
        fill(&log, policy, "z");

        assert!(policy.rotate(&log).unwrap());
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        assert!(!copy_path(&log, 1).exists());
    }
}
