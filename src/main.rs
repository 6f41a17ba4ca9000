// src/main.rs
use anyhow::{Context, Result};
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use upstream_balancer::{
    config::{self, Config},
    health::HealthChecker,
    load_balancer::Balancer,
    metrics::{MetricsCollector, MetricsRegistry},
    proxy::{BackendPool, Proxy},
    server::{RequestHandler, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("upstream_balancer=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    // Initialize metrics
    let metrics_registry = MetricsRegistry::new()?;
    let metrics = config.metrics.enabled.then(|| metrics_registry.collector());

    run(config, metrics_registry, metrics).await
}

async fn run(
    config: Config,
    metrics_registry: MetricsRegistry,
    metrics: Option<Arc<MetricsCollector>>,
) -> Result<()> {
    // Registry is rebuilt from configuration on every start
    let pool =
        BackendPool::from_configs(&config.backends).context("Failed to register backends")?;
    let balancer = Arc::new(Balancer::with_pool(Arc::new(pool), config.algorithm));
    info!(
        strategy = balancer.strategy_name(),
        backends = balancer.pool().len(),
        "Backend pool ready"
    );

    let proxy = Arc::new(Proxy::new(balancer.clone(), config.proxy.clone(), metrics.clone())?);

    // Start health checker
    let checker = Arc::new(
        HealthChecker::new(config.health_check.clone(), balancer.pool().clone(), metrics)
            .context("Failed to create health checker")?,
    );
    let health_task = tokio::spawn(checker.clone().start());

    // Start metrics server if enabled
    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, metrics_registry, config.metrics.path.clone())?;
    }

    // Start main server
    let addr: SocketAddr = ([0, 0, 0, 0], config.listen.port).into();
    info!("Starting load balancer on {}", addr);

    let result = ServerBuilder::new(addr)
        .with_handler(RequestHandler::new(proxy))
        .serve_with_shutdown(shutdown_signal())
        .await;

    checker.shutdown();
    if let Err(e) = health_task.await {
        error!("Health checker task failed: {}", e);
    }

    result
}

fn start_metrics_server(addr: SocketAddr, registry: MetricsRegistry, path: String) -> Result<()> {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move { Ok::<_, Infallible>(metrics_response(&req, &registry, &path)) }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind metrics server on {}", addr))?
        .serve(make_service);

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

fn metrics_response(req: &Request<Body>, registry: &MetricsRegistry, path: &str) -> Response<Body> {
    if req.uri().path() != path {
        let mut response = Response::new(Body::from("Not Found"));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return response;
    }

    match registry.gather() {
        Ok(metrics) => {
            let mut response = Response::new(Body::from(metrics));
            response.headers_mut().insert(
                CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            let mut response = Response::new(Body::from("failed to encode metrics"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
