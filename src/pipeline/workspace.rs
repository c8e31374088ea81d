//! Per-request scratch directories.
//!
//! A [`ScratchWorkspace`] owns a uniquely named directory holding the uploaded input,
//! the generator's output region and the workspace-local archive. The tree is removed by
//! [`ScratchWorkspace::release`], or by `Drop` when the owning request is cancelled or panics.
//! Work that may outlive the request (a generator still running after a timeout) holds a
//! [`WorkspaceLease`]; removal then happens when the last lease is dropped.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::metrics::METRICS;

const WORKSPACE_PREFIX: &str = "uml-tool-";
const INPUT_FILE_NAME: &str = "input.xmi";
const OUTPUT_DIR_NAME: &str = "output";
const ARCHIVE_FILE_NAME: &str = "project.zip";

#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: Arc<WorkspaceDir>,
    root: PathBuf,
    input_path: PathBuf,
    output_dir: PathBuf,
    archive_path: PathBuf,
}

impl ScratchWorkspace {
    /// Create a fresh workspace under `root`, or the system temp dir when `None`.
    ///
    /// The output directory is pre-created; the input slot and archive are not.
    pub fn acquire(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let input_path = dir.path().join(INPUT_FILE_NAME);
        let output_dir = dir.path().join(OUTPUT_DIR_NAME);
        let archive_path = dir.path().join(ARCHIVE_FILE_NAME);
        std::fs::create_dir(&output_dir)?;

        tracing::debug!(workspace = %dir.path().display(), "workspace acquired");

        Ok(Self {
            root: dir.path().to_path_buf(),
            dir: Arc::new(WorkspaceDir { dir: Some(dir) }),
            input_path,
            output_dir,
            archive_path,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where the packager writes the archive. Lives beside, not inside, the output region.
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Keep the tree on disk until the returned lease is dropped as well.
    pub fn lease(&self) -> WorkspaceLease {
        WorkspaceLease {
            _dir: self.dir.clone(),
        }
    }

    /// Recursively delete the workspace, or hand removal to the last outstanding lease.
    ///
    /// Failures are logged and counted; they never change the request outcome.
    pub fn release(self) {
        let ScratchWorkspace { dir, root, .. } = self;
        match Arc::try_unwrap(dir) {
            Ok(mut dir) => dir.remove(),
            Err(_shared) => tracing::debug!(
                workspace = %root.display(),
                "workspace still leased, removal deferred"
            ),
        }
    }
}

/// Keeps a workspace directory alive while the holder may still write into it.
#[derive(Debug, Clone)]
pub struct WorkspaceLease {
    _dir: Arc<WorkspaceDir>,
}

#[derive(Debug)]
struct WorkspaceDir {
    dir: Option<TempDir>,
}

impl WorkspaceDir {
    fn remove(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => tracing::debug!(workspace = %path.display(), "workspace released"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(workspace = %path.display(), "workspace already removed");
            }
            Err(error) => {
                METRICS.record_cleanup_failure("workspace");
                tracing::error!(
                    workspace = %path.display(),
                    error = %error,
                    error_kind = "cleanup_failure",
                    "failed to release workspace"
                );
            }
        }
    }
}

impl Drop for WorkspaceDir {
    fn drop(&mut self) {
        self.remove();
    }
}
