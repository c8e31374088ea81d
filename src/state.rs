use crate::config::ServerConfig;
use crate::health::HealthChecker;
use crate::pipeline::{GenerationPipeline, PipelineSettings, ProjectGenerator};
use crate::shutdown::ShutdownCoordinator;
use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Duration;

/// Shared by every handler. Cheap to clone; nothing here is per request.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub pipeline: GenerationPipeline,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>, generator: Arc<dyn ProjectGenerator>) -> Self {
        let pipeline =
            GenerationPipeline::new(PipelineSettings::from_config(&config), generator.clone());
        let shutdown = Arc::new(ShutdownCoordinator::new(Duration::from_secs(
            config.graceful_shutdown_timeout_secs,
        )));
        let health = Arc::new(HealthChecker::new(config.clone(), generator));
        Self {
            config,
            pipeline,
            shutdown,
            health,
        }
    }
}
