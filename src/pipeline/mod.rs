//! Request-processing pipeline for `POST /generate`.
//!
//! `Received → Validated → WorkspaceAcquired → Ingested → Generated → Packaged → Materialized`
//!
//! Any stage may fail with a [`PipelineError`]. The workspace is released on every
//! path once acquired; the materialized archive is deleted by its [`ArtifactCleanup`]
//! after the response body is delivered.

pub mod delivery;
pub mod generator;
pub mod ingest;
pub mod materialize;
pub mod packager;
pub mod workspace;

pub use delivery::archive_response;
pub use generator::{
    BlockingGenerator, CommandGenerator, GenerationJob, GeneratorError, ProjectGenerator,
    invoke_generator,
};
pub use ingest::{ingest_upload, validate_upload_filename};
pub use materialize::{ArtifactCleanup, MaterializedArchive, materialize_archive, remove_artifact};
pub use packager::package_directory;
pub use workspace::{ScratchWorkspace, WorkspaceLease};

use futures::Stream;
use std::fmt;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;

use crate::config::ServerConfig;
use crate::error::{ErrorKind, PipelineError};
use crate::metrics::METRICS;

/// Progress of one request through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Validated,
    WorkspaceAcquired,
    Ingested,
    Generated,
    Packaged,
    Materialized,
    Failed(ErrorKind),
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Received => write!(f, "received"),
            PipelineStage::Validated => write!(f, "validated"),
            PipelineStage::WorkspaceAcquired => write!(f, "workspace_acquired"),
            PipelineStage::Ingested => write!(f, "ingested"),
            PipelineStage::Generated => write!(f, "generated"),
            PipelineStage::Packaged => write!(f, "packaged"),
            PipelineStage::Materialized => write!(f, "materialized"),
            PipelineStage::Failed(kind) => write!(f, "failed({kind})"),
        }
    }
}

/// Uploaded file as handed over by the HTTP layer.
pub struct Upload<S> {
    pub filename: Option<String>,
    pub body: S,
}

/// Tunables for [`GenerationPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub scratch_root: Option<PathBuf>,
    pub artifact_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub generation_timeout: Option<Duration>,
}

impl PipelineSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            scratch_root: config.scratch_root.clone(),
            artifact_dir: config.artifact_dir(),
            max_upload_bytes: config.max_upload_bytes,
            generation_timeout: config.generation_timeout,
        }
    }
}

#[derive(Clone)]
pub struct GenerationPipeline {
    settings: PipelineSettings,
    generator: Arc<dyn ProjectGenerator>,
}

impl GenerationPipeline {
    pub fn new(settings: PipelineSettings, generator: Arc<dyn ProjectGenerator>) -> Self {
        Self {
            settings,
            generator,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn generator(&self) -> &Arc<dyn ProjectGenerator> {
        &self.generator
    }

    /// Run one upload through every stage.
    ///
    /// On success the returned archive lives outside the (already released) workspace
    /// and the caller owns running its cleanup.
    pub async fn process<S, B, E>(
        &self,
        upload: Upload<S>,
    ) -> Result<MaterializedArchive, PipelineError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut stage = PipelineStage::Received;
        let result = self.run_stages(upload, &mut stage).await;
        match &result {
            Ok(archive) => tracing::info!(
                stage = %stage,
                archive_bytes = archive.size,
                "generation pipeline completed"
            ),
            Err(error) => {
                let last_completed = stage;
                stage = PipelineStage::Failed(error.kind());
                tracing::info!(
                    stage = %stage,
                    last_completed = %last_completed,
                    "generation pipeline failed"
                );
            }
        }
        result
    }

    async fn run_stages<S, B, E>(
        &self,
        upload: Upload<S>,
        stage: &mut PipelineStage,
    ) -> Result<MaterializedArchive, PipelineError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let Upload { filename, body } = upload;
        validate_upload_filename(filename.as_deref())?;
        *stage = PipelineStage::Validated;

        let scratch_root = self.settings.scratch_root.clone();
        let workspace = task::spawn_blocking(move || ScratchWorkspace::acquire(scratch_root.as_deref()))
            .await
            .map_err(|error| PipelineError::IngestFailure(std::io::Error::other(error)))?
            .map_err(|error| {
                tracing::error!(%error, "failed to acquire workspace");
                PipelineError::IngestFailure(error)
            })?;
        *stage = PipelineStage::WorkspaceAcquired;

        let outcome = self.run_in_workspace(&workspace, body, stage).await;

        if let Err(error) = task::spawn_blocking(move || workspace.release()).await {
            METRICS.record_cleanup_failure("workspace");
            tracing::error!(%error, "workspace release task failed");
        }

        outcome
    }

    async fn run_in_workspace<S, B, E>(
        &self,
        workspace: &ScratchWorkspace,
        body: S,
        stage: &mut PipelineStage,
    ) -> Result<MaterializedArchive, PipelineError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let bytes = ingest_upload(body, workspace.input_path(), self.settings.max_upload_bytes)
            .await
            .inspect_err(|error| tracing::warn!(%error, "upload ingestion failed"))?;
        tracing::debug!(upload_bytes = bytes, "upload stored");
        *stage = PipelineStage::Ingested;

        let job = GenerationJob::new(workspace);
        invoke_generator(
            self.generator.as_ref(),
            &job,
            self.settings.generation_timeout,
        )
        .await?;
        *stage = PipelineStage::Generated;

        let output_dir = workspace.output_dir().to_path_buf();
        let archive_path = workspace.archive_path().to_path_buf();
        let lease = workspace.lease();
        let entries = task::spawn_blocking(move || {
            let _lease = lease;
            package_directory(&output_dir, &archive_path)
        })
            .await
            .map_err(|error| {
                PipelineError::PackagingFailure(zip::result::ZipError::Io(std::io::Error::other(
                    error,
                )))
            })??;
        tracing::debug!(entries, "archive packaged");
        *stage = PipelineStage::Packaged;

        let archive_path = workspace.archive_path().to_path_buf();
        let artifact_dir = self.settings.artifact_dir.clone();
        let lease = workspace.lease();
        let archive = task::spawn_blocking(move || {
            let _lease = lease;
            materialize_archive(&archive_path, &artifact_dir)
        })
            .await
            .map_err(|error| PipelineError::MaterializationFailure(std::io::Error::other(error)))??;
        METRICS.record_archive_size(archive.size);
        *stage = PipelineStage::Materialized;

        Ok(archive)
    }
}
