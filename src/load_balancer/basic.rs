// src/load_balancer/basic.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

/// Always the first healthy backend in registration order.
#[derive(Debug, Default)]
pub struct BasicBalancer;

impl BasicBalancer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LoadBalancer for BasicBalancer {
    async fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        for backend in backends {
            if backend.is_healthy().await {
                return Some(backend.clone());
            }
        }
        None
    }

    fn name(&self) -> &'static str {
        "basic"
    }
}
