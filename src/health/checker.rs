// src/health/checker.rs
use crate::config::{HealthCheckConfig, ProbeProtocol};
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendPool};
use crate::retry::RetryStrategy;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const USER_AGENT: &str = "upstream-balancer-health-check";

#[derive(Debug, thiserror::Error)]
pub enum HealthCheckError {
    #[error("failed to build health check client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Why a single probe attempt failed.
#[derive(Debug, thiserror::Error)]
enum ProbeError {
    #[error("HTTP {0}")]
    Status(StatusCode),

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub backend_id: String,
    pub healthy: bool,
    pub latency: Duration,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Counts from one completed round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub healthy: usize,
    pub unhealthy: usize,
}

pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: Arc<BackendPool>,
    client: Client,
    retry: RetryStrategy,
    metrics: Option<Arc<MetricsCollector>>,
    // Held for the whole of a round so rounds never overlap.
    round: Mutex<()>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        pool: Arc<BackendPool>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self, HealthCheckError> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(deadline) = config.timeout() {
            builder = builder.timeout(deadline);
        }
        builder = match config.protocol {
            ProbeProtocol::Http1 => builder.http1_only(),
            ProbeProtocol::Http2 => builder.http2_prior_knowledge(),
        };
        let client = builder.build()?;

        let retry = RetryStrategy::new(config.retry_config());
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Ok(Self {
            config,
            pool,
            client,
            retry,
            metrics,
            round: Mutex::new(()),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Drive `check_health` on the configured interval until `shutdown`.
    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            interval = ?self.config.interval(),
            max_attempts = self.config.max_attempts,
            protocol = ?self.config.protocol,
            "Starting health checker"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_health().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Probe every registered backend concurrently and wait for all of them.
    pub async fn check_health(self: &Arc<Self>) -> RoundSummary {
        let _round = self.round.lock().await;

        let backends = self.pool.list();

        // Dropping the set aborts every probe, so an abandoned round cannot
        // outlive `_round`.
        let mut probes = JoinSet::new();
        for backend in backends.iter().cloned() {
            let checker = self.clone();
            probes.spawn(async move { checker.fire(backend).await });
        }

        let mut summary = RoundSummary::default();
        while let Some(result) = probes.join_next().await {
            match result {
                Ok(check) if check.healthy => {
                    summary.healthy += 1;
                    debug!(
                        backend = %check.backend_id,
                        latency_ms = check.latency.as_millis() as u64,
                        attempts = check.attempts,
                        "Backend is healthy"
                    );
                }
                Ok(check) => {
                    summary.unhealthy += 1;
                    debug!(
                        backend = %check.backend_id,
                        attempts = check.attempts,
                        error = ?check.error,
                        "Backend is unhealthy"
                    );
                }
                Err(e) => {
                    error!("Health probe task failed: {}", e);
                    summary.unhealthy += 1;
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(summary.healthy, backends.len());
        }

        info!(
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            "Health check round complete"
        );
        summary
    }

    /// Probe one backend, retrying up to `max_attempts`, and store the outcome.
    pub async fn fire(&self, backend: Arc<Backend>) -> HealthCheckResult {
        let start = Instant::now();

        let outcome = self
            .retry
            .execute(|attempt| {
                let backend = &backend;
                async move {
                    let result = self.probe_once(backend).await;
                    if let Err(e) = &result {
                        debug!(backend = %backend.id, attempt, error = %e, "Probe attempt failed");
                    }
                    result
                }
            })
            .await;

        let latency = start.elapsed();
        let healthy = outcome.result.is_ok();
        let previous = backend.update_health(healthy, latency).await;

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.id, healthy, latency.as_millis() as u64);
        }

        if previous.healthy && !healthy {
            warn!(
                backend = %backend.id,
                attempts = outcome.attempts,
                active_connections = backend.active_connections(),
                "Backend is now unhealthy"
            );
        } else if !previous.healthy && healthy {
            info!(backend = %backend.id, "Backend is now healthy");
        }

        HealthCheckResult {
            backend_id: backend.id.clone(),
            healthy,
            latency,
            attempts: outcome.attempts,
            error: outcome.result.err().map(|e| e.to_string()),
        }
    }

    async fn probe_once(&self, backend: &Backend) -> Result<(), ProbeError> {
        let request = self.client.head(backend.url.clone()).send();

        let response = match self.config.timeout() {
            Some(deadline) => timeout(deadline, request)
                .await
                .map_err(|_| ProbeError::Timeout(deadline))??,
            None => request.await?,
        };

        let status = response.status();
        if status.as_u16() < 300 {
            Ok(())
        } else {
            Err(ProbeError::Status(status))
        }
    }
}
