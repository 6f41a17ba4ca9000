// src/proxy/pool.rs
use super::backend::{endpoint_key, Backend};
use crate::config::BackendConfig;
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use url::Url;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("backend {0} is already registered")]
    DuplicateBackend(String),

    #[error("backend {0} is not registered")]
    BackendNotFound(String),

    #[error("invalid backend endpoint {0}: only http and https with a host are supported")]
    InvalidEndpoint(String),
}

/// Ordered set of backends.
///
/// Readers load an immutable snapshot without locking; writers build a new
/// vector and swap it in while holding `write_lock`, so check-then-insert
/// is atomic with respect to other writers.
#[derive(Debug, Default)]
pub struct BackendPool {
    backends: ArcSwap<Vec<Arc<Backend>>>,
    write_lock: Mutex<()>,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[BackendConfig]) -> Result<Self, PoolError> {
        let pool = Self::new();
        pool.register(configs.iter().map(|c| Backend::new(c.url.clone())))?;
        Ok(pool)
    }

    /// Register a batch. Either every backend is added or none is.
    pub fn register<I>(&self, backends: I) -> Result<Vec<Arc<Backend>>, PoolError>
    where
        I: IntoIterator<Item = Backend>,
    {
        let incoming: Vec<Arc<Backend>> = backends.into_iter().map(Arc::new).collect();
        for backend in &incoming {
            validate_endpoint(&backend.url)?;
        }

        let _writer = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.backends.load_full();

        let mut seen: HashSet<&str> = current.iter().map(|b| b.id.as_str()).collect();
        for backend in &incoming {
            if !seen.insert(backend.id.as_str()) {
                return Err(PoolError::DuplicateBackend(backend.id.clone()));
            }
        }

        let mut next = Vec::with_capacity(current.len() + incoming.len());
        next.extend(current.iter().cloned());
        next.extend(incoming.iter().cloned());
        self.backends.store(Arc::new(next));

        for backend in &incoming {
            tracing::info!(backend = %backend.id, "Registered backend");
        }
        Ok(incoming)
    }

    /// Remove the backend with the given endpoint.
    pub fn deregister(&self, endpoint: &Url) -> Result<Arc<Backend>, PoolError> {
        let key = endpoint_key(endpoint);

        let _writer = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.backends.load_full();

        let position = current
            .iter()
            .position(|b| b.id == key)
            .ok_or_else(|| PoolError::BackendNotFound(key.clone()))?;

        let mut next = (*current).clone();
        let removed = next.remove(position);
        self.backends.store(Arc::new(next));

        tracing::info!(backend = %removed.id, "Deregistered backend");
        Ok(removed)
    }

    /// Point-in-time view in registration order.
    pub fn list(&self) -> Arc<Vec<Arc<Backend>>> {
        self.backends.load_full()
    }

    pub fn len(&self) -> usize {
        self.backends.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_endpoint(url: &Url) -> Result<(), PoolError> {
    let supported = matches!(url.scheme(), "http" | "https");
    if !supported || url.host_str().map_or(true, str::is_empty) {
        return Err(PoolError::InvalidEndpoint(url.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> Backend {
        Backend::new(Url::parse(url).unwrap())
    }

    fn ids(pool: &BackendPool) -> Vec<String> {
        pool.list().iter().map(|b| b.id.clone()).collect()
    }

    #[test]
    fn register_preserves_insertion_order() {
        let pool = BackendPool::new();
        pool.register([backend("http://b:1"), backend("http://a:1")]).unwrap();
        pool.register([backend("http://c:1")]).unwrap();

        assert_eq!(ids(&pool), vec!["http://b:1", "http://a:1", "http://c:1"]);
    }

    #[test]
    fn duplicate_rejects_whole_batch() {
        let pool = BackendPool::new();
        pool.register([backend("http://a:1")]).unwrap();

        let err = pool
            .register([backend("http://b:1"), backend("http://a:1/")])
            .unwrap_err();

        assert_eq!(err, PoolError::DuplicateBackend("http://a:1".into()));
        assert_eq!(ids(&pool), vec!["http://a:1"]);
    }

    #[test]
    fn duplicate_within_one_batch_is_rejected() {
        let pool = BackendPool::new();
        let err = pool
            .register([backend("http://a:1"), backend("http://a:1")])
            .unwrap_err();

        assert!(matches!(err, PoolError::DuplicateBackend(_)));
        assert!(pool.is_empty());
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let pool = BackendPool::new();
        let err = pool.register([backend("ftp://a:21")]).unwrap_err();
        assert!(matches!(err, PoolError::InvalidEndpoint(_)));
        assert!(pool.is_empty());
    }

    #[test]
    fn deregister_removes_and_reports_missing() {
        let pool = BackendPool::new();
        pool.register([backend("http://a:1"), backend("http://b:1"), backend("http://c:1")])
            .unwrap();

        let removed = pool.deregister(&Url::parse("http://b:1").unwrap()).unwrap();
        assert_eq!(removed.id, "http://b:1");
        assert_eq!(ids(&pool), vec!["http://a:1", "http://c:1"]);

        let err = pool.deregister(&Url::parse("http://b:1").unwrap()).unwrap_err();
        assert_eq!(err, PoolError::BackendNotFound("http://b:1".into()));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let pool = BackendPool::new();
        pool.register([backend("http://a:1")]).unwrap();

        let snapshot = pool.list();
        pool.register([backend("http://b:1")]).unwrap();
        pool.deregister(&Url::parse("http://a:1").unwrap()).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "http://a:1");
        assert_eq!(ids(&pool), vec!["http://b:1"]);
    }
}
