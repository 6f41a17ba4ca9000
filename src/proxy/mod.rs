// src/proxy/mod.rs
mod backend;
mod pool;
mod proxy;

pub use backend::{endpoint_key, Backend, ConnectionGuard};
pub use pool::{BackendPool, PoolError};
pub use proxy::{rewrite_uri, Proxy, ProxyError};
