use crate::config::ServerConfig;
use crate::error::PipelineError;
use crate::health;
use crate::logging::generate_request_span;
use crate::metrics::{METRICS, RequestMetrics};
use crate::pipeline::{GenerationPipeline, ProjectGenerator, Upload, archive_response};
use crate::state::AppState;
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use std::future::IntoFuture;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::Instrument;
use uuid::Uuid;

/// Multipart field carrying the model.
pub const UPLOAD_FIELD: &str = "file";
const LANDING_PAGE: &str = "index.html";
/// Mount point for the landing page's scripts and styles.
pub const STATIC_PREFIX: &str = "/static";
/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;
const METRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// The HTTP service. Built explicitly from a config and a generator; there is no
/// process-wide app instance.
#[derive(Clone)]
pub struct UmlToolServer {
    state: AppState,
}

impl UmlToolServer {
    pub fn new(config: Arc<ServerConfig>, generator: Arc<dyn ProjectGenerator>) -> Self {
        Self {
            state: AppState::new(config, generator),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        let body_limit = self
            .state
            .config
            .max_upload_bytes
            .saturating_add(MULTIPART_OVERHEAD_BYTES);
        let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

        Router::new()
            .route("/", get(landing_handler))
            .route(
                "/generate",
                post(generate_handler).layer(DefaultBodyLimit::max(body_limit)),
            )
            .route("/health", get(health::liveness_handler))
            .route("/ready", get(health::readiness_handler))
            .route("/metrics", get(metrics_handler))
            .nest_service(STATIC_PREFIX, ServeDir::new(&self.state.config.static_dir))
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self) -> Result<()> {
        let bind_addr = self.state.config.http_bind_address;
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    ///
    /// After a shutdown signal the listener closes and in-flight requests get the
    /// configured drain timeout before they are dropped.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let actual_addr = listener.local_addr()?;
        tracing::info!(
            bind = %actual_addr,
            generator = self.state.pipeline.generator().name(),
            "listening"
        );

        let coordinator = self.state.shutdown.clone();
        let signal_coordinator = coordinator.clone();
        let server_future = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                signal_coordinator.wait_for_signal().await;
            })
            .into_future();

        tokio::pin!(server_future);

        tokio::select! {
            result = &mut server_future => {
                result.context("http server failed")?;
                coordinator.finish(true);
            }
            _ = coordinator.drain_deadline() => {
                coordinator.finish(false);
            }
        }
        Ok(())
    }
}

async fn landing_handler(State(state): State<AppState>) -> Response {
    let page = state.config.static_dir.join(LANDING_PAGE);
    match tokio::fs::read_to_string(&page).await {
        Ok(html) => Html(html).into_response(),
        Err(error) => {
            tracing::debug!(page = %page.display(), %error, "landing page unavailable");
            Json(serde_json::json!({ "message": "Hello World" })).into_response()
        }
    }
}

async fn metrics_handler() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        METRICS.encode(),
    )
        .into_response()
}

async fn generate_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = generate_request_span(&request_id);

    async move {
        let _in_flight = state.shutdown.track_request();
        let metrics = RequestMetrics::new();

        match generate(&state.pipeline, multipart).await {
            Ok(response) => {
                metrics.success();
                response
            }
            Err(error) => {
                metrics.error(error.kind());
                error.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

async fn generate(
    pipeline: &GenerationPipeline,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, PipelineError> {
    let mut multipart = multipart.map_err(|rejection| {
        tracing::warn!(%rejection, "request is not multipart/form-data");
        PipelineError::InvalidInputFormat { filename: None }
    })?;

    // First part named `file`, or failing that the first part that carries a filename.
    let field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some(UPLOAD_FIELD) || field.file_name().is_some() {
                    break field;
                }
            }
            Ok(None) => {
                tracing::warn!("no file part in upload");
                return Err(PipelineError::InvalidInputFormat { filename: None });
            }
            Err(error) => {
                tracing::warn!(%error, "malformed multipart body");
                return Err(PipelineError::IngestFailure(io::Error::other(
                    error.to_string(),
                )));
            }
        }
    };

    let upload = Upload {
        filename: field.file_name().map(str::to_owned),
        body: field,
    };
    let archive = pipeline.process(upload).await?;
    archive_response(archive).await
}
