//! demos/test_backend.rs
//! Run: cargo run --example test_backend -- <port> [name]
//!
//! Routes:
//!   HEAD|GET /health   200 while healthy, 503 otherwise
//!   POST /toggle       flip the health flag
//!   GET  /stream       20 lines, one every 100 ms (watch the proxy flush them)
//!   *    anything else JSON echo after BASE_DELAY_MS ± JITTER_MS, failing FAIL_PCT %

use hyper::{
    header::CONTENT_TYPE,
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use rand::Rng;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;

#[derive(Clone)]
struct DemoBackend {
    port: u16,
    name: String,
    requests: Arc<AtomicU64>,
    healthy: Arc<AtomicBool>,
    base_delay_ms: u64,
    jitter_ms: u64,
    fail_pct: f64,
}

fn status(code: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = code;
    response
}

async fn handle(req: Request<Body>, backend: DemoBackend) -> Result<Response<Body>, Infallible> {
    let n = backend.requests.fetch_add(1, Ordering::SeqCst) + 1;
    let path = req.uri().path().to_owned();

    match (req.method(), path.as_str()) {
        (&Method::HEAD | &Method::GET, "/health") => {
            return Ok(if backend.healthy.load(Ordering::SeqCst) {
                status(StatusCode::OK, "OK")
            } else {
                status(StatusCode::SERVICE_UNAVAILABLE, "Unhealthy")
            });
        }
        (&Method::POST, "/toggle") => {
            let was = backend.healthy.fetch_xor(true, Ordering::SeqCst);
            println!("[{}] health -> {}", backend.name, !was);
            return Ok(status(StatusCode::NO_CONTENT, ""));
        }
        (&Method::GET, "/stream") => {
            let (mut sender, body) = Body::channel();
            let name = backend.name.clone();
            tokio::spawn(async move {
                for line in 0..20 {
                    let chunk = format!("{} line {}\n", name, line);
                    if sender.send_data(chunk.into()).await.is_err() {
                        return;
                    }
                    sleep(Duration::from_millis(100)).await;
                }
            });
            let mut response = Response::new(body);
            response
                .headers_mut()
                .insert(CONTENT_TYPE, "text/plain".parse().expect("static header"));
            return Ok(response);
        }
        _ => {}
    }

    let delay = backend.base_delay_ms + rand::thread_rng().gen_range(0..=backend.jitter_ms);
    if delay > 0 {
        sleep(Duration::from_millis(delay)).await;
    }

    if backend.fail_pct > 0.0 && rand::thread_rng().gen_bool((backend.fail_pct / 100.0).min(1.0)) {
        return Ok(status(StatusCode::INTERNAL_SERVER_ERROR, "Injected failure"));
    }

    let body = format!(
        r#"{{"backend":"{}","port":{},"req":{},"method":"{}","path":"{}","delay_ms":{}}}"#,
        backend.name,
        backend.port,
        n,
        req.method(),
        path,
        delay
    );

    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, "application/json".parse().expect("static header"));
    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let port: u16 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "8001".into())
        .parse()?;
    let name = std::env::args()
        .nth(2)
        .or_else(|| std::env::var("BACKEND_NAME").ok())
        .unwrap_or_else(|| format!("backend-{port}"));

    let env_num = |key: &str| std::env::var(key).ok().and_then(|v| v.parse().ok());
    let backend = DemoBackend {
        port,
        name: name.clone(),
        requests: Arc::new(AtomicU64::new(0)),
        healthy: Arc::new(AtomicBool::new(true)),
        base_delay_ms: env_num("BASE_DELAY_MS").unwrap_or(0),
        jitter_ms: env_num("JITTER_MS").unwrap_or(0),
        fail_pct: std::env::var("FAIL_PCT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0),
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let make_svc = make_service_fn(move |_conn| {
        let backend = backend.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, backend.clone()))) }
    });

    println!("Demo backend '{}' on http://{}", name, addr);
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
