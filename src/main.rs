use clap::Parser;
use uml_tool::{CliArgs, LoggingConfig, ServerConfig, init_logging, run_server, shutdown_telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logging_config = LoggingConfig::from_env();
    let _guard = init_logging(logging_config)?;

    let cli = CliArgs::parse();
    let config = ServerConfig::from_args(cli)?;

    // Fail fast before binding
    config.validate()?;

    let result = run_server(config).await;

    // Flush traces before exit
    shutdown_telemetry();

    result
}
