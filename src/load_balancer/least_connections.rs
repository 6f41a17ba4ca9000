// src/load_balancer/least_connections.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

/// Healthy backend with the fewest in-flight requests.
/// Ties go to the earliest registered.
#[derive(Debug, Default)]
pub struct LeastConnectionsBalancer;

impl LeastConnectionsBalancer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LoadBalancer for LeastConnectionsBalancer {
    async fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let mut best: Option<(&Arc<Backend>, usize)> = None;

        for backend in backends {
            if !backend.is_healthy().await {
                continue;
            }
            let active = backend.active_connections();
            match best {
                Some((_, lowest)) if active >= lowest => {}
                _ => best = Some((backend, active)),
            }
        }

        best.map(|(backend, _)| backend.clone())
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
