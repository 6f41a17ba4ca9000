// src/load_balancer/round_robin.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Rotates through backends in registration order, skipping unhealthy ones.
///
/// `counter` holds the index of the last pick. Each call advances it by one
/// before testing health, so a fresh balancer starts at the second backend.
/// It is reduced modulo the snapshot size on every call, so it survives the
/// registry growing or shrinking.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

/// First healthy index at or after `start`, wrapping, within one lap.
fn next_healthy(healthy: &[bool], start: usize) -> Option<usize> {
    let len = healthy.len();
    (0..len)
        .map(|step| (start + step) % len)
        .find(|&index| healthy[index])
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let mut healthy = Vec::with_capacity(backends.len());
        for backend in backends {
            healthy.push(backend.is_healthy().await);
        }
        let len = backends.len();

        // Advance and skip as one atomic step so concurrent callers never
        // start from the same cursor value.
        let previous = self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cursor| {
                let start = (cursor % len + 1) % len;
                Some(next_healthy(&healthy, start).unwrap_or(start))
            })
            .unwrap_or_else(|cursor| cursor);

        next_healthy(&healthy, (previous % len + 1) % len).map(|index| backends[index].clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
