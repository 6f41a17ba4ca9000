// src/load_balancer/balancer.rs
use super::{create_load_balancer, LoadBalancer};
use crate::config::LoadBalancerAlgorithm;
use crate::proxy::{Backend, BackendPool, PoolError};
use std::sync::Arc;
use url::Url;

/// A backend pool paired with the strategy that selects from it.
#[derive(Clone)]
pub struct Balancer {
    pool: Arc<BackendPool>,
    strategy: Arc<dyn LoadBalancer>,
}

impl Balancer {
    pub fn new(algorithm: LoadBalancerAlgorithm) -> Self {
        Self::with_pool(Arc::new(BackendPool::new()), algorithm)
    }

    pub fn with_pool(pool: Arc<BackendPool>, algorithm: LoadBalancerAlgorithm) -> Self {
        Self::with_strategy(pool, create_load_balancer(algorithm))
    }

    pub fn with_strategy(pool: Arc<BackendPool>, strategy: Arc<dyn LoadBalancer>) -> Self {
        Self { pool, strategy }
    }

    pub async fn next_server(&self) -> Option<Arc<Backend>> {
        let snapshot = self.pool.list();
        self.strategy.select_backend(&snapshot).await
    }

    pub fn register<I>(&self, backends: I) -> Result<Vec<Arc<Backend>>, PoolError>
    where
        I: IntoIterator<Item = Backend>,
    {
        self.pool.register(backends)
    }

    pub fn deregister(&self, endpoint: &Url) -> Result<Arc<Backend>, PoolError> {
        self.pool.deregister(endpoint)
    }

    pub fn list(&self) -> Arc<Vec<Arc<Backend>>> {
        self.pool.list()
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }
}

impl std::fmt::Debug for Balancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Balancer")
            .field("strategy", &self.strategy.name())
            .field("backends", &self.pool.len())
            .finish()
    }
}
