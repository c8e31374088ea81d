pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod shutdown;
pub mod state;

pub use config::{CliArgs, ServerConfig};
pub use error::{ErrorKind, PipelineError};
pub use logging::{LoggingConfig, init_logging, shutdown_telemetry};
pub use pipeline::{BlockingGenerator, CommandGenerator, GeneratorError, ProjectGenerator};
pub use server::UmlToolServer;
pub use shutdown::ShutdownCoordinator;

use anyhow::{Context, Result};
use std::sync::Arc;

/// Build the command-line generator from `config` and serve until shutdown.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let program = config
        .generator_program
        .clone()
        .context("no project generator configured")?;
    let generator = Arc::new(CommandGenerator::new(
        program,
        config.generator_args.clone(),
        config.incompatible_exit_code,
    ));

    tracing::info!(
        bind = %config.http_bind_address,
        scratch_root = %config.scratch_root().display(),
        artifact_dir = %config.artifact_dir().display(),
        generator = %generator.program().display(),
        "starting uml-tool server",
    );

    if let Err(reason) = generator.readiness() {
        tracing::warn!(%reason, "generator not ready at startup");
    }

    UmlToolServer::new(Arc::new(config), generator).run().await
}
