use crate::config::ServerConfig;
use crate::pipeline::ProjectGenerator;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// Health status for a component or the overall system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The worse of the two.
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            _ => HealthStatus::Unhealthy,
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            error: None,
            timestamp: unix_now(),
            details: None,
        }
    }

    pub fn healthy_with_details(component: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            ..Self::healthy(component)
        }
    }

    pub fn unhealthy(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            error: Some(error.into()),
            timestamp: unix_now(),
            details: None,
        }
    }
}

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: String,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    /// Components that are not ready
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ready: Vec<String>,
    pub components: HashMap<String, ComponentHealth>,
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

/// Checks the directories and the generator the pipeline depends on.
#[derive(Clone)]
pub struct HealthChecker {
    config: Arc<ServerConfig>,
    generator: Arc<dyn ProjectGenerator>,
}

impl HealthChecker {
    pub fn new(config: Arc<ServerConfig>, generator: Arc<dyn ProjectGenerator>) -> Self {
        Self { config, generator }
    }

    /// Healthy whenever the process can answer.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: unix_now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Ready when a request could run every pipeline stage.
    pub async fn readiness(&self) -> ReadinessResponse {
        let components = self.check_all_components().await;
        let mut overall = HealthStatus::Healthy;
        let mut not_ready = Vec::new();

        for (name, health) in &components {
            overall = overall.combine(health.status);
            if health.status == HealthStatus::Unhealthy {
                not_ready.push(name.clone());
            }
        }
        not_ready.sort();

        ReadinessResponse {
            ready: overall != HealthStatus::Unhealthy,
            status: overall,
            timestamp: unix_now(),
            not_ready,
            components,
        }
    }

    async fn check_all_components(&self) -> HashMap<String, ComponentHealth> {
        let scratch_root = self.config.scratch_root();
        let artifact_dir = self.config.artifact_dir();
        let (scratch, artifacts) = tokio::task::spawn_blocking(move || {
            (
                check_writable_dir("scratch_root", &scratch_root),
                check_writable_dir("artifact_dir", &artifact_dir),
            )
        })
        .await
        .unwrap_or_else(|error| {
            let message = format!("directory check panicked: {error}");
            (
                ComponentHealth::unhealthy("scratch_root", message.clone()),
                ComponentHealth::unhealthy("artifact_dir", message),
            )
        });

        let mut components = HashMap::new();
        components.insert("scratch_root".to_string(), scratch);
        components.insert("artifact_dir".to_string(), artifacts);
        components.insert("generator".to_string(), self.check_generator());
        components
    }

    fn check_generator(&self) -> ComponentHealth {
        let name = self.generator.name().to_string();
        match self.generator.readiness() {
            Ok(()) => ComponentHealth::healthy_with_details(
                "generator",
                serde_json::json!({ "name": name }),
            ),
            Err(reason) => ComponentHealth::unhealthy("generator", format!("{name}: {reason}")),
        }
    }
}

/// A directory is healthy when a file can be created in it.
fn check_writable_dir(component: &str, dir: &Path) -> ComponentHealth {
    if !dir.is_dir() {
        return ComponentHealth::unhealthy(
            component,
            format!("not a directory: {}", dir.display()),
        );
    }

    match tempfile::tempfile_in(dir) {
        Ok(_) => ComponentHealth::healthy_with_details(
            component,
            serde_json::json!({
                "path": dir.display().to_string(),
                "writable": true,
            }),
        ),
        Err(e) => ComponentHealth::unhealthy(
            component,
            format!("directory is not writable: {} ({})", dir.display(), e),
        ),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.liveness()
}

pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.readiness().await
}
