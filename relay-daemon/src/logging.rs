//! Tracing subscriber set-up.
//!
//! One-shot commands log to stderr; the daemon appends to the configured log
//! file. In both cases `RUST_LOG` overrides the configured level.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use relay_core::{LogFormat, LoggingConfig};

use crate::error::{io_err, DaemonError};
use crate::log_rotation::{self, RotationPolicy};

/// How often the daemon checks its log file size.
pub const ROTATION_INTERVAL: Duration = Duration::from_secs(60);

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Log to stderr. A second call is a no-op.
pub fn init_stderr(level: &str) {
    let _ = fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

/// Log to `config.file`, creating its directory and rotating an oversized
/// file first.
pub fn init_file(config: &LoggingConfig) -> Result<(), DaemonError> {
    if let Some(dir) = config.file.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    log_rotation::rotate_log(&config.file, RotationPolicy::from_config(config));

    let writer = LogFile::new(&config.file);
    let builder = fmt()
        .with_env_filter(filter(&config.level))
        .with_ansi(false)
        .with_writer(writer);
    let result = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| DaemonError::Logging(e.to_string()))
}

/// Check the log file size every [`ROTATION_INTERVAL`] until cancelled.
pub async fn rotation_task(path: PathBuf, policy: RotationPolicy, token: CancellationToken) {
    let mut interval = tokio::time::interval(ROTATION_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                let path = path.clone();
                // Failures are logged inside rotate_log.
                let _ = tokio::task::spawn_blocking(move || log_rotation::rotate_log(&path, policy)).await;
            }
        }
    }
}

/// Opens the log in append mode for every event so writes follow the file
/// across rotations. Falls back to stderr when the file cannot be opened.
#[derive(Debug, Clone)]
pub struct LogFile {
    path: PathBuf,
}

impl LogFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

pub enum LogWriter {
    File(File),
    Stderr(io::Stderr),
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogWriter::File(f) => f.write(buf),
            LogWriter::Stderr(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogWriter::File(f) => f.flush(),
            LogWriter::Stderr(e) => e.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => LogWriter::File(file),
            Err(_) => LogWriter::Stderr(io::stderr()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn log_writes_follow_the_file_across_rotation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gerrit-relay.log");
        let log = LogFile::new(&path);

        log.make_writer().write_all(b"first\n").unwrap();
        fs::rename(&path, dir.path().join("gerrit-relay.log.1")).unwrap();
        log.make_writer().write_all(b"second\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
        assert_eq!(
            fs::read_to_string(dir.path().join("gerrit-relay.log.1")).unwrap(),
            "first\n"
        );
    }

    #[test]
    fn unwritable_path_falls_back_to_stderr() {
        let dir = TempDir::new().unwrap();
        let log = LogFile::new(&dir.path().join("missing").join("x.log"));
        assert!(matches!(log.make_writer(), LogWriter::Stderr(_)));
    }
}
