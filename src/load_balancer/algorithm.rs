// src/load_balancer/algorithm.rs
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

/// A backend selection strategy.
///
/// `backends` is a registry snapshot in registration order. Implementations
/// must only return a backend they observed as healthy during this call.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    async fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;

    fn name(&self) -> &'static str;
}

pub use crate::config::LoadBalancerAlgorithm;
