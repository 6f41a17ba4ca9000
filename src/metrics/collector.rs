// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub upstream_errors_total: IntCounterVec,

    // Backend metrics
    pub backend_connections_active: IntGaugeVec,
    pub backend_health_status: IntGaugeVec,
    pub backend_probe_latency_ms: IntGaugeVec,

    // Pool metrics
    pub healthy_backends: IntGauge,
    pub total_backends: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Total number of proxied requests"),
            &["method", "status_code", "backend"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Time from request arrival to upstream response head",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let upstream_errors_total = IntCounterVec::new(
            Opts::new("lb_upstream_errors_total", "Transport failures talking to a backend"),
            &["backend"],
        )?;
        registry.register(Box::new(upstream_errors_total.clone()))?;

        let backend_connections_active = IntGaugeVec::new(
            Opts::new(
                "lb_backend_connections_active",
                "Requests currently in flight per backend",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_connections_active.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "lb_backend_health_status",
                "Backend health status (1=healthy, 0=unhealthy)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let backend_probe_latency_ms = IntGaugeVec::new(
            Opts::new(
                "lb_backend_probe_latency_ms",
                "Duration of the last health probe round-trip",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_probe_latency_ms.clone()))?;

        let healthy_backends =
            IntGauge::new("lb_healthy_backends", "Number of healthy backends")?;
        registry.register(Box::new(healthy_backends.clone()))?;

        let total_backends = IntGauge::new("lb_total_backends", "Total number of backends")?;
        registry.register(Box::new(total_backends.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            upstream_errors_total,
            backend_connections_active,
            backend_health_status,
            backend_probe_latency_ms,
            healthy_backends,
            total_backends,
        })
    }

    pub fn record_request(&self, method: &str, status_code: u16, backend: &str, elapsed: Duration) {
        self.requests_total
            .with_label_values(&[method, &status_code.to_string(), backend])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[backend])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_upstream_error(&self, backend: &str) {
        self.upstream_errors_total.with_label_values(&[backend]).inc();
    }

    pub fn set_backend_connections(&self, backend: &str, active: usize) {
        self.backend_connections_active
            .with_label_values(&[backend])
            .set(active as i64);
    }

    pub fn update_backend_health(&self, backend: &str, healthy: bool, latency_ms: u64) {
        self.backend_health_status
            .with_label_values(&[backend])
            .set(i64::from(healthy));
        self.backend_probe_latency_ms
            .with_label_values(&[backend])
            .set(i64::try_from(latency_ms).unwrap_or(i64::MAX));
    }

    pub fn update_backend_counts(&self, healthy: usize, total: usize) {
        self.healthy_backends.set(healthy as i64);
        self.total_backends.set(total as i64);
    }
}
