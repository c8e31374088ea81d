//! Structured logging setup.
//!
//! JSON output in production, pretty output in development, optional rotated file
//! output and optional OpenTelemetry export when an OTLP endpoint is configured.

use anyhow::{Context, Result};
use opentelemetry::{KeyValue, trace::TraceError};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, Tracer},
};
use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const SERVICE_NAME: &str = "uml-tool";

/// Configuration for logging setup.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Directory for log files (when output is `File`)
    pub log_dir: PathBuf,
    pub log_file_prefix: String,
    pub service_name: String,
    pub service_version: String,
    /// e.g. "development", "production"
    pub environment: String,
    pub enable_otel: bool,
    pub otlp_endpoint: Option<String>,
    pub enable_rotation: bool,
    /// OpenTelemetry trace sampling rate (0.0 to 1.0)
    pub otel_sampling_rate: f64,
    pub otlp_timeout_secs: u64,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Log output destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily rotated file under `log_dir`
    File,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let is_production = is_production(&environment);

        Self {
            format: if is_production {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            output: LogOutput::Stderr,
            log_dir: PathBuf::from("logs"),
            log_file_prefix: SERVICE_NAME.to_string(),
            service_name: SERVICE_NAME.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment,
            enable_otel: false,
            otlp_endpoint: None,
            enable_rotation: true,
            otel_sampling_rate: if is_production { 0.1 } else { 1.0 },
            otlp_timeout_secs: 10,
        }
    }
}

fn is_production(environment: &str) -> bool {
    environment == "production" || environment == "prod"
}

impl LoggingConfig {
    /// Defaults overridden by `LOG_FORMAT`, `LOG_OUTPUT`, `LOG_DIR` and the standard
    /// `OTEL_*` variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(format) = env::var("LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => config.format,
            };
        }

        if let Ok(output) = env::var("LOG_OUTPUT") {
            config.output = match output.to_lowercase().as_str() {
                "stdout" => LogOutput::Stdout,
                "stderr" => LogOutput::Stderr,
                "file" => LogOutput::File,
                _ => config.output,
            };
        }

        if let Ok(log_dir) = env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(log_dir);
        }

        if let Ok(otel_endpoint) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.enable_otel = true;
            config.otlp_endpoint = Some(otel_endpoint);
        }

        if let Ok(rate) = env::var("OTEL_SAMPLING_RATE") {
            if let Ok(rate) = rate.parse::<f64>() {
                config.otel_sampling_rate = rate.clamp(0.0, 1.0);
            }
        }

        if let Ok(timeout) = env::var("OTEL_EXPORTER_OTLP_TIMEOUT") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                config.otlp_timeout_secs = timeout;
            }
        }

        config
    }

    fn resource(&self) -> Resource {
        Resource::new(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                self.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                self.service_version.clone(),
            ),
            KeyValue::new("environment", self.environment.clone()),
        ])
    }

    fn sampler(&self) -> Sampler {
        if self.otel_sampling_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.otel_sampling_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                self.otel_sampling_rate,
            )))
        }
    }
}

/// Initialize the global subscriber.
///
/// The returned guard must be held for the lifetime of the process so buffered
/// log lines are flushed.
pub fn init_logging(config: LoggingConfig) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let default_level = if is_production(&config.environment) {
            "info"
        } else {
            "debug"
        };
        EnvFilter::new(format!("{default_level},hyper=info,tower=info"))
    });

    let (writer, guard) = match config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
        LogOutput::File => {
            std::fs::create_dir_all(&config.log_dir).context("failed to create log directory")?;
            let file_appender = if config.enable_rotation {
                tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix)
            } else {
                tracing_appender::rolling::never(&config.log_dir, &config.log_file_prefix)
            };
            tracing_appender::non_blocking(file_appender)
        }
    };

    // The OTel layer is generic over the subscriber it sits on, so it is built per format.
    let tracer = match (config.enable_otel, config.otlp_endpoint.as_ref()) {
        (true, Some(_)) => match init_tracer(&config) {
            Ok(tracer) => Some(tracer),
            Err(e) => {
                eprintln!(
                    "Warning: failed to initialize OpenTelemetry exporter: {e}. Continuing without distributed tracing."
                );
                None
            }
        },
        _ => None,
    };

    let registry = tracing_subscriber::registry();

    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_filter(env_filter);
            let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

            registry.with(fmt_layer).with(otel_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_target(true)
                .with_level(true)
                .with_line_number(true)
                .with_file(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_ansi(true)
                .with_filter(env_filter);
            let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

            registry.with(fmt_layer).with(otel_layer).init();
        }
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        format = ?config.format,
        output = ?config.output,
        otel = config.enable_otel,
        "logging initialized"
    );

    Ok(guard)
}

/// Install the batch OTLP pipeline as the global provider and return its tracer.
fn init_tracer(config: &LoggingConfig) -> Result<Tracer, TraceError> {
    let endpoint = config
        .otlp_endpoint
        .as_ref()
        .ok_or_else(|| TraceError::Other("no OTLP endpoint configured".into()))?;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(config.otlp_timeout_secs));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(config.sampler())
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(config.resource()),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
}

/// Flush and stop the OpenTelemetry exporter.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Warn when an operation exceeds `threshold_ms`, otherwise log at debug.
#[macro_export]
macro_rules! log_slow_operation {
    ($duration:expr, $threshold_ms:expr, $($arg:tt)*) => {
        {
            let duration_ms = $duration.as_millis() as u64;
            if duration_ms > $threshold_ms {
                tracing::warn!(
                    duration_ms = duration_ms,
                    threshold_ms = $threshold_ms,
                    $($arg)*
                );
            } else {
                tracing::debug!(
                    duration_ms = duration_ms,
                    $($arg)*
                );
            }
        }
    };
}

/// Span wrapping one `POST /generate` request.
pub fn generate_request_span(request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "generate_request",
        request_id = request_id,
        service = SERVICE_NAME,
        version = env!("CARGO_PKG_VERSION")
    )
}
