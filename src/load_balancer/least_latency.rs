// src/load_balancer/least_latency.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

/// Healthy backend with the lowest last-probed latency.
/// Ties go to the earliest registered.
#[derive(Debug, Default)]
pub struct LeastLatencyBalancer;

impl LeastLatencyBalancer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LoadBalancer for LeastLatencyBalancer {
    async fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        // One read per backend so health and latency come from the same probe.
        let mut healthy = Vec::with_capacity(backends.len());
        for backend in backends {
            let status = backend.health().await;
            if status.healthy {
                healthy.push((backend, status.latency_ms));
            }
        }

        if healthy.len() == 1 {
            return Some(healthy[0].0.clone());
        }

        healthy
            .into_iter()
            .min_by_key(|(_, latency)| *latency)
            .map(|(backend, _)| backend.clone())
    }

    fn name(&self) -> &'static str {
        "least_latency"
    }
}
