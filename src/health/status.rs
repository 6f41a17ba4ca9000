// src/health/status.rs
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Health and probe latency of one backend, read and written as a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: u64,
    pub last_checked: Option<DateTime<Utc>>,
}

impl HealthStatus {
    /// Backends start out healthy until the first probe says otherwise.
    pub fn optimistic() -> Self {
        Self {
            healthy: true,
            latency_ms: 0,
            last_checked: None,
        }
    }

    pub fn probed(healthy: bool, latency: Duration) -> Self {
        Self {
            healthy,
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            last_checked: Some(Utc::now()),
        }
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::optimistic()
    }
}
