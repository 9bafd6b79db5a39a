//! Per-job scratch workspaces.
//!
//! Each pipeline invocation gets a fresh, uniquely named directory under the
//! configured scratch root. The directory is removed when the [`ScratchDir`]
//! is dropped, on success and failure paths alike.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{io_err, SyncError};

#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl ScratchDir {
    /// Create `root/<label>-XXXXXX`, creating `root` first if needed.
    pub fn create(root: &Path, label: &str) -> Result<Self, SyncError> {
        fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize(label)))
            .tempdir_in(root)
            .map_err(|e| io_err(root, e))?;
        let path = dir.path().to_path_buf();
        tracing::debug!(path = %path.display(), "created scratch directory");
        Ok(Self {
            path,
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove scratch directory");
            }
        }
    }
}

/// Project names contain `/`; keep labels to one path component.
fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_are_unique_and_removed_on_drop() {
        let root = TempDir::new().expect("root");
        let a = ScratchDir::create(root.path(), "nova").expect("a");
        let b = ScratchDir::create(root.path(), "nova").expect("b");
        assert_ne!(a.path(), b.path());
        assert!(a.path().is_dir() && b.path().is_dir());

        let kept = a.path().to_path_buf();
        fs::write(kept.join("file"), "x").expect("write");
        drop(a);
        assert!(!kept.exists());
        assert!(b.path().exists());
    }

    #[test]
    fn creates_missing_root() {
        let base = TempDir::new().expect("base");
        let root = base.path().join("tmp").join("relay");
        let dir = ScratchDir::create(&root, "x").expect("create");
        assert!(dir.path().starts_with(&root));
    }

    #[test]
    fn labels_stay_in_one_component() {
        let root = TempDir::new().expect("root");
        let dir = ScratchDir::create(root.path(), "openstack/nova").expect("create");
        assert_eq!(dir.path().parent(), Some(root.path()));
        assert_eq!(sanitize("openstack/nova"), "openstack-nova");
    }
}
