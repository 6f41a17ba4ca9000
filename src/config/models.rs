// src/config/models.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub algorithm: LoadBalancerAlgorithm,
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("at least one backend must be configured");
        }
        self.health_check.validate()?;
        self.proxy.validate()?;
        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            bail!("metrics.path must start with '/', got {:?}", self.metrics.path);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
        }
    }
}

/// Selection strategy identifier.
///
/// `WeightedRoundRobin` and `Random` are reserved: they parse, but no
/// algorithm exists for them yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerAlgorithm {
    Basic,
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    Random,
    LeastLatency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: Url,
}

/// Transport used by health probes. Independent of what the proxy forwards with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeProtocol {
    #[default]
    Http1,
    Http2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub protocol: ProbeProtocol,
    #[serde(default)]
    pub backoff_base_ms: u64,
    #[serde(default)]
    pub backoff_max_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout_secs(),
            protocol: ProbeProtocol::default(),
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }
}

impl HealthCheckConfig {
    pub const MAX_TIMEOUT_SECS: u64 = 300;

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Per-attempt deadline. `None` when `timeout_secs` is zero.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: self.backoff_max_ms,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("health_check.max_attempts must be at least 1");
        }
        if self.timeout_secs > Self::MAX_TIMEOUT_SECS {
            bail!(
                "health_check.timeout_secs must be within 0..={}, got {}",
                Self::MAX_TIMEOUT_SECS,
                self.timeout_secs
            );
        }
        if self.interval_ms == 0 {
            bail!("health_check.interval_ms must be greater than zero");
        }
        if self.backoff_max_ms > 0 && self.backoff_base_ms > self.backoff_max_ms {
            bail!("health_check.backoff_base_ms must not exceed backoff_max_ms");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: usize,
    #[serde(default)]
    pub upstream_timeout_secs: u64,
    #[serde(default = "default_timing_header")]
    pub timing_header: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            stream_chunk_size: default_stream_chunk_size(),
            upstream_timeout_secs: 0,
            timing_header: default_timing_header(),
        }
    }
}

impl ProxyConfig {
    pub fn upstream_timeout(&self) -> Option<Duration> {
        (self.upstream_timeout_secs > 0).then(|| Duration::from_secs(self.upstream_timeout_secs))
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_chunk_size == 0 {
            bail!("proxy.stream_chunk_size must be greater than zero");
        }
        if self.timing_header.trim().is_empty() {
            bail!("proxy.timing_header must not be empty");
        }
        if hyper::header::HeaderName::from_bytes(self.timing_header.as_bytes()).is_err() {
            bail!("proxy.timing_header {:?} is not a valid header name", self.timing_header);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

fn default_listen_port() -> u16 {
    8080
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    1
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_stream_chunk_size() -> usize {
    1024
}

fn default_timing_header() -> String {
    "X-Processing-Time".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
