/// Prometheus metrics for the generation service
///
/// Collects request outcomes, pipeline error kinds, cleanup failures and archive sizes.
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ErrorKind;

/// Global metrics registry instance
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

/// Labels for request outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// "success" or "error"
    pub status: String,
}

/// Labels for pipeline error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub kind: String,
}

/// Labels for cleanup failures
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CleanupLabels {
    /// "workspace" or "artifact"
    pub target: String,
}

/// Central metrics collector with Prometheus registry
pub struct MetricsCollector {
    registry: RwLock<Registry>,

    /// Total generate requests by outcome
    pub generate_requests_total: Family<RequestLabels, Counter>,

    /// End-to-end pipeline latency in seconds
    pub generate_duration_seconds: Histogram,

    /// Requests currently inside the pipeline
    pub generate_active_requests: Gauge,

    /// Pipeline failures by error kind
    pub pipeline_errors_total: Family<ErrorLabels, Counter>,

    /// Failed deletions of workspaces or materialized archives
    pub cleanup_failures_total: Family<CleanupLabels, Counter>,

    /// Size of archives handed to clients
    pub archive_bytes: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let generate_requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "uml_generate_requests",
            "Total number of generate requests",
            generate_requests_total.clone(),
        );

        // Buckets: 50ms .. ~6.5min
        let generate_duration_seconds = Histogram::new(exponential_buckets(0.05, 2.5, 11));
        registry.register(
            "uml_generate_duration_seconds",
            "Generate request latency histogram in seconds",
            generate_duration_seconds.clone(),
        );

        let generate_active_requests = Gauge::default();
        registry.register(
            "uml_generate_active_requests",
            "Number of generate requests currently being processed",
            generate_active_requests.clone(),
        );

        let pipeline_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "uml_pipeline_errors",
            "Total number of pipeline failures by error kind",
            pipeline_errors_total.clone(),
        );

        let cleanup_failures_total = Family::<CleanupLabels, Counter>::default();
        registry.register(
            "uml_cleanup_failures",
            "Total number of failed workspace or artifact deletions",
            cleanup_failures_total.clone(),
        );

        // Buckets: 1KiB .. 1GiB
        let archive_bytes = Histogram::new(exponential_buckets(1024.0, 4.0, 11));
        registry.register(
            "uml_archive_bytes",
            "Size in bytes of archives returned to clients",
            archive_bytes.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            generate_requests_total,
            generate_duration_seconds,
            generate_active_requests,
            pipeline_errors_total,
            cleanup_failures_total,
            archive_bytes,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(error) = encode(&mut buffer, &registry) {
            tracing::warn!(?error, "failed to encode metrics");
        }
        buffer
    }

    pub fn record_request_success(&self, duration: Duration) {
        self.generate_requests_total
            .get_or_create(&RequestLabels {
                status: "success".to_string(),
            })
            .inc();
        self.generate_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_request_error(&self, duration: Duration) {
        self.generate_requests_total
            .get_or_create(&RequestLabels {
                status: "error".to_string(),
            })
            .inc();
        self.generate_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_pipeline_error(&self, kind: ErrorKind) {
        self.pipeline_errors_total
            .get_or_create(&ErrorLabels {
                kind: kind.as_str().to_string(),
            })
            .inc();
    }

    /// Record a failed deletion. Also counted under the `cleanup_failure` error kind.
    pub fn record_cleanup_failure(&self, target: &str) {
        self.cleanup_failures_total
            .get_or_create(&CleanupLabels {
                target: target.to_string(),
            })
            .inc();
        self.record_pipeline_error(ErrorKind::CleanupFailure);
    }

    pub fn record_archive_size(&self, bytes: u64) {
        self.archive_bytes.observe(bytes as f64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for request timing
///
/// Increments the active gauge on creation. The outcome is recorded by
/// [`RequestMetrics::success`] or [`RequestMetrics::error`]; a guard dropped
/// without either (cancelled request) counts as an error.
pub struct RequestMetrics {
    collector: Arc<MetricsCollector>,
    start: Instant,
    completed: bool,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::with_collector(METRICS.clone())
    }

    pub fn with_collector(collector: Arc<MetricsCollector>) -> Self {
        collector.generate_active_requests.inc();
        Self {
            collector,
            start: Instant::now(),
            completed: false,
        }
    }

    pub fn success(mut self) {
        self.collector
            .record_request_success(self.start.elapsed());
        self.finish();
    }

    pub fn error(mut self, kind: ErrorKind) {
        self.collector.record_request_error(self.start.elapsed());
        self.collector.record_pipeline_error(kind);
        self.finish();
    }

    fn finish(&mut self) {
        self.completed = true;
        self.collector.generate_active_requests.dec();
    }
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RequestMetrics {
    fn drop(&mut self) {
        if !self.completed {
            self.collector.record_request_error(self.start.elapsed());
            self.finish();
        }
    }
}
