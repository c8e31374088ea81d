//! Graceful shutdown coordination.
//!
//! On SIGINT/SIGTERM the listener stops accepting connections and in-flight
//! `POST /generate` requests get `drain_timeout` to finish. Requests still running
//! after that are dropped; dropping a request still reclaims its workspace.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    /// Listener closed, waiting for in-flight requests
    Draining,
    Complete,
    /// Drain timeout hit with requests still running
    Forced,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::Draining => write!(f, "draining"),
            ShutdownPhase::Complete => write!(f, "complete"),
            ShutdownPhase::Forced => write!(f, "forced"),
        }
    }
}

pub struct ShutdownCoordinator {
    drain_timeout: Duration,
    phase: RwLock<ShutdownPhase>,
    shutdown_token: CancellationToken,
    active_requests: Arc<AtomicU64>,
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            drain_timeout,
            phase: RwLock::new(ShutdownPhase::Running),
            shutdown_token: CancellationToken::new(),
            active_requests: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.read()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Start shutdown without waiting for a signal.
    pub fn initiate(&self) {
        {
            let mut phase = self.phase.write();
            if *phase == ShutdownPhase::Running {
                *phase = ShutdownPhase::Draining;
            }
        }
        self.shutdown_token.cancel();
    }

    /// Count a request as in flight until the returned guard is dropped.
    pub fn track_request(&self) -> InFlightRequest {
        self.active_requests.fetch_add(1, Ordering::AcqRel);
        InFlightRequest {
            active: self.active_requests.clone(),
        }
    }

    pub fn active_request_count(&self) -> u64 {
        self.active_requests.load(Ordering::Acquire)
    }

    /// Resolves on SIGINT, SIGTERM or [`initiate`](Self::initiate), whichever comes
    /// first, and moves the coordinator into the draining phase.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    warn!(%error, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
            _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
            _ = self.shutdown_token.cancelled() => info!("shutdown requested"),
        }

        self.initiate();
        info!(
            in_flight = self.active_request_count(),
            timeout_secs = self.drain_timeout.as_secs(),
            "draining in-flight requests"
        );
    }

    /// Resolves once shutdown has started and the drain timeout has elapsed.
    pub async fn drain_deadline(&self) {
        self.shutdown_token.cancelled().await;
        tokio::time::sleep(self.drain_timeout).await;
    }

    /// Record how the drain ended.
    pub fn finish(&self, drained: bool) {
        let phase = if drained {
            info!("graceful shutdown completed");
            ShutdownPhase::Complete
        } else {
            warn!(
                remaining_requests = self.active_request_count(),
                "drain timeout reached, dropping in-flight requests"
            );
            ShutdownPhase::Forced
        };
        *self.phase.write() = phase;
    }
}

/// Guard returned by [`ShutdownCoordinator::track_request`].
#[derive(Debug)]
pub struct InFlightRequest {
    active: Arc<AtomicU64>,
}

impl Drop for InFlightRequest {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}
