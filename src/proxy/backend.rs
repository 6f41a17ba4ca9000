// src/proxy/backend.rs
use crate::health::HealthStatus;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

#[derive(Debug)]
pub struct Backend {
    /// Normalized endpoint; unique within a pool.
    pub id: String,
    pub url: Url,

    // Runtime state
    active_connections: AtomicUsize,
    health: RwLock<HealthStatus>,
}

impl Backend {
    pub fn new(url: Url) -> Self {
        Self {
            id: endpoint_key(&url),
            url,
            active_connections: AtomicUsize::new(0),
            health: RwLock::new(HealthStatus::optimistic()),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Count one in-flight request until the returned guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            backend: self.clone(),
        }
    }

    fn release(&self) {
        // Saturating so a stray release can never wrap the counter.
        let _ = self
            .active_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub async fn health(&self) -> HealthStatus {
        *self.health.read().await
    }

    pub async fn is_healthy(&self) -> bool {
        self.health.read().await.healthy
    }

    pub async fn latency_ms(&self) -> u64 {
        self.health.read().await.latency_ms
    }

    /// Store the outcome of a probe. Health and latency change together.
    pub async fn update_health(&self, healthy: bool, latency: Duration) -> HealthStatus {
        let mut status = self.health.write().await;
        let previous = *status;
        *status = HealthStatus::probed(healthy, latency);
        previous
    }
}

/// Normalized identity of an endpoint: scheme, host, effective port and path.
pub fn endpoint_key(url: &Url) -> String {
    let path = url.path().trim_end_matches('/');
    format!(
        "{}://{}:{}{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        url.port_or_known_default().unwrap_or_default(),
        path
    )
}

/// Decrements the backend's connection counter exactly once, on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl ConnectionGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for ConnectionGuard {
    type Target = Backend;

    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> Arc<Backend> {
        Arc::new(Backend::new(Url::parse(url).unwrap()))
    }

    #[test]
    fn endpoint_key_normalizes_default_port_and_trailing_slash() {
        let a = Url::parse("http://LocalHost/").unwrap();
        let b = Url::parse("http://localhost:80").unwrap();
        assert_eq!(endpoint_key(&a), endpoint_key(&b));

        let c = Url::parse("http://localhost:8001/health/").unwrap();
        assert_eq!(endpoint_key(&c), "http://localhost:8001/health");
    }

    #[test]
    fn endpoint_key_distinguishes_ports() {
        let a = Url::parse("http://localhost:8000").unwrap();
        let b = Url::parse("http://localhost:8001").unwrap();
        assert_ne!(endpoint_key(&a), endpoint_key(&b));
    }

    #[test]
    fn guard_releases_on_drop() {
        let b = backend("http://127.0.0.1:9000");
        let g1 = b.acquire();
        let g2 = b.acquire();
        assert_eq!(b.active_connections(), 2);
        drop(g1);
        assert_eq!(b.active_connections(), 1);
        drop(g2);
        assert_eq!(b.active_connections(), 0);
    }

    #[test]
    fn release_never_goes_negative() {
        let b = backend("http://127.0.0.1:9000");
        b.release();
        assert_eq!(b.active_connections(), 0);
    }

    #[tokio::test]
    async fn starts_healthy_and_records_probe() {
        let b = backend("http://127.0.0.1:9000");
        assert!(b.is_healthy().await);
        assert!(b.health().await.last_checked.is_none());

        let previous = b.update_health(false, Duration::from_millis(42)).await;
        assert!(previous.healthy);

        let status = b.health().await;
        assert!(!status.healthy);
        assert_eq!(status.latency_ms, 42);
        assert!(status.last_checked.is_some());
    }
}
