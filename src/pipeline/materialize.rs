//! Moving the finished archive out of the workspace.
//!
//! The workspace is torn down before the response body is sent, so the archive is
//! copied to an independently owned temp file. Deleting that file is deferred to an
//! [`ArtifactCleanup`] which the response body runs once it has been fully sent. If every
//! handle is dropped without running it (the request was cancelled first), the last
//! one deletes the file.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::PipelineError;
use crate::metrics::METRICS;

const ARTIFACT_PREFIX: &str = "project-";
const ARTIFACT_SUFFIX: &str = ".zip";

/// Archive living outside any workspace, plus the action that deletes it.
#[derive(Debug)]
pub struct MaterializedArchive {
    pub path: PathBuf,
    pub size: u64,
    pub cleanup: ArtifactCleanup,
}

/// Single-shot deletion of a materialized archive. Clones share the same state.
#[derive(Debug, Clone)]
pub struct ArtifactCleanup {
    inner: Arc<CleanupState>,
}

#[derive(Debug)]
struct CleanupState {
    path: PathBuf,
    done: AtomicBool,
}

impl ArtifactCleanup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(CleanupState {
                path: path.into(),
                done: AtomicBool::new(false),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Delete the artifact. Only the first call across all clones does anything;
    /// returns whether this call was it.
    pub fn run(&self) -> bool {
        if self.inner.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        remove_artifact(&self.inner.path);
        true
    }

    /// Like [`run`](Self::run), but the deletion goes to the blocking pool when called
    /// inside a runtime.
    pub fn run_in_background(&self) -> bool {
        if self.inner.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        remove_artifact_in_background(self.inner.path.clone());
        true
    }

    pub fn has_run(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }
}

impl Drop for CleanupState {
    fn drop(&mut self) {
        if !*self.done.get_mut() {
            tracing::debug!(artifact = %self.path.display(), "artifact abandoned before delivery");
            remove_artifact_in_background(std::mem::take(&mut self.path));
        }
    }
}

fn remove_artifact_in_background(path: PathBuf) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(move || remove_artifact(&path));
        }
        Err(_) => remove_artifact(&path),
    }
}

/// Delete a file, treating "already gone" as success.
///
/// Other failures are logged and counted as cleanup failures; nothing is returned
/// because no caller can act on it.
pub fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(artifact = %path.display(), "artifact removed"),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => {
            METRICS.record_cleanup_failure("artifact");
            tracing::warn!(
                artifact = %path.display(),
                %error,
                error_kind = "cleanup_failure",
                "failed to remove artifact"
            );
        }
    }
}

/// Copy `archive` into a new uniquely named file under `artifact_dir`.
///
/// If the copy fails the partially written destination is deleted before returning.
pub fn materialize_archive(
    archive: &Path,
    artifact_dir: &Path,
) -> Result<MaterializedArchive, PipelineError> {
    let mut destination = tempfile::Builder::new()
        .prefix(ARTIFACT_PREFIX)
        .suffix(ARTIFACT_SUFFIX)
        .tempfile_in(artifact_dir)
        .map_err(|error| materialization_failed(archive, error))?;

    let copied = File::open(archive).and_then(|mut source| {
        let size = io::copy(&mut source, destination.as_file_mut())?;
        destination.as_file_mut().flush()?;
        destination.as_file().sync_all()?;
        Ok(size)
    });

    let size = match copied {
        Ok(size) => size,
        Err(error) => {
            let partial = destination.path().to_path_buf();
            if let Err(close_error) = destination.close() {
                if close_error.kind() != io::ErrorKind::NotFound {
                    METRICS.record_cleanup_failure("artifact");
                    tracing::warn!(
                        artifact = %partial.display(),
                        error = %close_error,
                        "failed to remove partial artifact"
                    );
                }
            }
            return Err(materialization_failed(archive, error));
        }
    };

    // From here on the file outlives the handle; the cleanup action owns deletion.
    let path = destination
        .into_temp_path()
        .keep()
        .map_err(|error| materialization_failed(archive, error.error))?;

    Ok(MaterializedArchive {
        cleanup: ArtifactCleanup::new(path.clone()),
        path,
        size,
    })
}

fn materialization_failed(archive: &Path, error: io::Error) -> PipelineError {
    tracing::error!(
        archive = %archive.display(),
        %error,
        "failed to materialize archive"
    );
    PipelineError::MaterializationFailure(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn copy_outlives_source() {
        let workspace = tempfile::tempdir().unwrap();
        let artifacts = tempfile::tempdir().unwrap();
        let archive = workspace.path().join("project.zip");
        std::fs::write(&archive, b"PK\x05\x06zip-bytes").unwrap();

        let materialized = materialize_archive(&archive, artifacts.path()).expect("materialized");
        drop(workspace);

        assert!(materialized.path.starts_with(artifacts.path()));
        assert_eq!(materialized.size, 13);
        assert_eq!(
            std::fs::read(&materialized.path).unwrap(),
            b"PK\x05\x06zip-bytes"
        );
        let name = materialized.path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("project-") && name.ends_with(".zip"));
    }

    #[test]
    fn cleanup_runs_once_and_tolerates_missing_file() {
        let artifacts = tempfile::tempdir().unwrap();
        let source = artifacts.path().join("source.zip");
        std::fs::write(&source, b"zip").unwrap();
        let materialized = materialize_archive(&source, artifacts.path()).unwrap();
        let other_handle = materialized.cleanup.clone();

        assert!(!materialized.cleanup.has_run());
        assert!(materialized.cleanup.run());
        assert!(!materialized.path.exists());
        assert!(!other_handle.run());
        assert!(other_handle.has_run());

        // Out-of-band retry on a file that is already gone.
        remove_artifact(&materialized.path);
        remove_artifact(&materialized.path);
    }

    #[test]
    fn dropping_every_handle_without_cleanup_removes_artifact() {
        let artifacts = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let source = workspace.path().join("project.zip");
        std::fs::write(&source, b"zip").unwrap();

        let materialized = materialize_archive(&source, artifacts.path()).unwrap();
        let path = materialized.path.clone();
        let other_handle = materialized.cleanup.clone();
        drop(materialized);
        assert!(path.exists());

        drop(other_handle);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(artifacts.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_copy_leaves_no_partial_file() {
        let artifacts = tempfile::tempdir().unwrap();
        let err = materialize_archive(&artifacts.path().join("missing.zip"), artifacts.path())
            .expect_err("source missing");

        assert_matches!(err, PipelineError::MaterializationFailure(_));
        assert_eq!(std::fs::read_dir(artifacts.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_artifact_dir_is_materialization_failure() {
        let workspace = tempfile::tempdir().unwrap();
        let archive = workspace.path().join("project.zip");
        std::fs::write(&archive, b"zip").unwrap();

        let err = materialize_archive(&archive, &workspace.path().join("nope"))
            .expect_err("no artifact dir");
        assert_matches!(err, PipelineError::MaterializationFailure(_));
    }
}
