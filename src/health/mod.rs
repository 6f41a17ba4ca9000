// src/health/mod.rs
mod checker;
mod status;

pub use checker::{HealthCheckError, HealthCheckResult, HealthChecker, RoundSummary};
pub use status::HealthStatus;
