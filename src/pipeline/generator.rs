//! Boundary to the external project generator.
//!
//! The generator is a black box taking an input `.xmi` path and an output directory.
//! It either populates the directory, reports that the input is incompatible, or fails
//! in some other way. [`invoke_generator`] folds those outcomes into the pipeline's
//! error taxonomy.
//!
//! A [`GenerationJob`] names the input and output paths and holds a lease on the
//! workspace, so the tree stays on disk for as long as any copy of the job is alive.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;

use super::workspace::{ScratchWorkspace, WorkspaceLease};
use crate::error::PipelineError;

/// Failure reported by a generator.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The interchange file is malformed or uses unsupported structure.
    #[error("incompatible input: {0}")]
    IncompatibleInput(String),
    /// Anything else.
    #[error("{0}")]
    Fault(String),
}

/// Input and output of one generator run.
///
/// Work that may keep running after the request gave up on it must hold a clone;
/// the workspace is removed only once every clone is gone.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    input: PathBuf,
    output: PathBuf,
    _lease: WorkspaceLease,
}

impl GenerationJob {
    pub fn new(workspace: &ScratchWorkspace) -> Self {
        Self {
            input: workspace.input_path().to_path_buf(),
            output: workspace.output_dir().to_path_buf(),
            _lease: workspace.lease(),
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

#[async_trait]
pub trait ProjectGenerator: Send + Sync {
    /// Populate the job's output directory with a project generated from its input.
    async fn generate(&self, job: &GenerationJob) -> Result<(), GeneratorError>;

    /// Short name for logs and health output.
    fn name(&self) -> &str;

    /// Whether the generator looks usable. Reported by the readiness endpoint.
    fn readiness(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Runs the generator and maps its outcome. No retries.
pub async fn invoke_generator(
    generator: &dyn ProjectGenerator,
    job: &GenerationJob,
    timeout: Option<Duration>,
) -> Result<(), PipelineError> {
    let started = Instant::now();
    let input = job.input();
    let run = generator.generate(job);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(result) => result,
            Err(_) => Err(GeneratorError::Fault(format!(
                "generator did not finish within {}s",
                limit.as_secs()
            ))),
        },
        None => run.await,
    };

    crate::log_slow_operation!(
        started.elapsed(),
        30_000,
        generator = generator.name(),
        "project generation finished"
    );

    match result {
        Ok(()) => Ok(()),
        Err(GeneratorError::IncompatibleInput(detail)) => {
            tracing::warn!(
                generator = generator.name(),
                input = %input.display(),
                detail = %detail,
                "generator rejected input as incompatible"
            );
            Err(PipelineError::IncompatibleInput(detail))
        }
        Err(GeneratorError::Fault(detail)) => {
            tracing::error!(
                generator = generator.name(),
                input = %input.display(),
                detail = %detail,
                "project generation failed"
            );
            Err(PipelineError::GenerationFailure(detail))
        }
    }
}

// =============================================================================
// EXTERNAL COMMAND
// =============================================================================

/// Generator backed by an external executable.
///
/// Invoked as `<program> [args..] <input> <output>`. Exit status 0 is success and
/// `incompatible_exit_code` means the input was rejected; stderr becomes the detail.
/// The child is killed if the invocation is dropped (timeout, cancelled request).
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: PathBuf,
    args: Vec<String>,
    incompatible_exit_code: i32,
    name: String,
}

impl CommandGenerator {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, incompatible_exit_code: i32) -> Self {
        let program = program.into();
        let name = program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        Self {
            program,
            args,
            incompatible_exit_code,
            name,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl ProjectGenerator for CommandGenerator {
    async fn generate(&self, job: &GenerationJob) -> Result<(), GeneratorError> {
        let result = Command::new(&self.program)
            .args(&self.args)
            .arg(job.input())
            .arg(job.output())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| {
                GeneratorError::Fault(format!(
                    "failed to run {}: {error}",
                    self.program.display()
                ))
            })?;

        if !result.stdout.is_empty() {
            tracing::debug!(
                generator = %self.name,
                stdout = %String::from_utf8_lossy(&result.stdout).trim_end(),
                "generator output"
            );
        }

        let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
        match result.status.code() {
            Some(0) => Ok(()),
            Some(code) if code == self.incompatible_exit_code => {
                Err(GeneratorError::IncompatibleInput(stderr))
            }
            Some(code) => Err(GeneratorError::Fault(format!(
                "generator exited with status {code}: {stderr}"
            ))),
            None => Err(GeneratorError::Fault(format!(
                "generator terminated by signal: {stderr}"
            ))),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn readiness(&self) -> Result<(), String> {
        // Bare names are resolved through PATH at spawn time.
        if self.program.components().count() > 1 && !self.program.is_file() {
            return Err(format!(
                "generator program {} does not exist",
                self.program.display()
            ));
        }
        Ok(())
    }
}

// =============================================================================
// IN-PROCESS CLOSURE
// =============================================================================

type GenerateFn = dyn Fn(&Path, &Path) -> Result<(), GeneratorError> + Send + Sync;

/// Generator backed by a synchronous function, run on the blocking pool.
///
/// A panic inside the function is reported as a fault. The blocking task cannot be
/// cancelled, so it keeps its own copy of the job until the function returns.
#[derive(Clone)]
pub struct BlockingGenerator {
    name: String,
    run: Arc<GenerateFn>,
}

impl BlockingGenerator {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&Path, &Path) -> Result<(), GeneratorError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(run),
        }
    }
}

impl std::fmt::Debug for BlockingGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingGenerator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProjectGenerator for BlockingGenerator {
    async fn generate(&self, job: &GenerationJob) -> Result<(), GeneratorError> {
        let run = self.run.clone();
        let job = job.clone();
        tokio::task::spawn_blocking(move || run(job.input(), job.output()))
            .await
            .map_err(|error| {
                let reason = if error.is_panic() {
                    "generator panicked"
                } else {
                    "generator task cancelled"
                };
                GeneratorError::Fault(reason.to_string())
            })?
    }

    fn name(&self) -> &str {
        &self.name
    }
}
