// ────────────────────────────────
// src/proxy/proxy.rs
// Forwards inbound requests to a selected backend and streams the reply back
// ────────────────────────────────

use super::backend::ConnectionGuard;
use crate::config::ProxyConfig;
use crate::load_balancer::Balancer;
use crate::metrics::MetricsCollector;
use futures::channel::oneshot;
use futures::StreamExt;
use hyper::body::{Bytes, HttpBody, Sender};
use hyper::client::HttpConnector;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, HOST};
use hyper::http::uri::{Authority, PathAndQuery, Scheme};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};
use url::Url;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub struct Proxy {
    balancer: Arc<Balancer>,
    client: Client<HttpsConnector<HttpConnector>, Body>,
    config: ProxyConfig,
    timing_header: HeaderName,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(
        balancer: Arc<Balancer>,
        config: ProxyConfig,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self, ProxyError> {
        let timing_header = HeaderName::from_bytes(config.timing_header.as_bytes())
            .map_err(|_| ProxyError::InvalidTimingHeader(config.timing_header.clone()))?;
        let client = Client::builder().build::<_, Body>(HttpsConnector::new());

        Ok(Self {
            balancer,
            client,
            config,
            timing_header,
            metrics,
        })
    }

    pub fn balancer(&self) -> &Arc<Balancer> {
        &self.balancer
    }

    /// Proxy one request. Failures become a 502 with the error as body.
    pub async fn handle(&self, mut req: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let request_id = ensure_request_id(&mut req);
        let method = req.method().clone();
        let span = tracing::info_span!(
            "proxy",
            request_id = %request_id,
            method = %method,
            path = %req.uri().path(),
        );

        async move {
            info!("Incoming request");

            let (mut response, backend) = match self.dispatch(req).await {
                Ok((response, backend)) => (response, Some(backend)),
                Err(err) => {
                    warn!(%err, "Request not successful");
                    (err.into(), None)
                }
            };

            let elapsed = start.elapsed();
            if let Ok(value) = HeaderValue::from_str(&format_elapsed(elapsed)) {
                response.headers_mut().insert(self.timing_header.clone(), value);
            }

            if let Some(metrics) = &self.metrics {
                metrics.record_request(
                    method.as_str(),
                    response.status().as_u16(),
                    backend.as_deref().unwrap_or("none"),
                    elapsed,
                );
            }
            response
        }
        .instrument(span)
        .await
    }

    /// Select a backend, forward `req` to it and return the response head.
    ///
    /// The body is copied by a background task that holds the backend's
    /// connection guard until the copy ends.
    pub async fn dispatch(&self, req: Request<Body>) -> Result<(Response<Body>, String), ProxyError> {
        let backend = self
            .balancer
            .next_server()
            .await
            .ok_or(ProxyError::NoHealthyUpstream)?;

        let guard = backend.acquire();
        self.report_connections(&guard);
        debug!(backend = %guard.id, active = guard.active_connections(), "Using backend");

        let result = self.forward(req, &guard.url).await;
        let upstream = match result {
            Ok(upstream) => upstream,
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_upstream_error(&guard.id);
                }
                drop(guard);
                self.report_connections_for(&backend.id, backend.active_connections());
                return Err(err);
            }
        };

        info!(backend = %guard.id, status = upstream.status().as_u16(), "Upstream responded");

        let (parts, upstream_body) = upstream.into_parts();
        let (sender, channel) = Body::channel();
        // The caller's body owns `caller_rx`; dropping it resolves
        // `caller_tx.cancellation()` in the copy task.
        let (caller_tx, caller_rx) = oneshot::channel::<()>();
        let body = Body::wrap_stream(channel.map(move |chunk| {
            let _caller = &caller_rx;
            chunk
        }));

        let mut response = Response::new(body);
        *response.status_mut() = parts.status;
        if let Some(content_type) = parts.headers.get(CONTENT_TYPE) {
            response.headers_mut().insert(CONTENT_TYPE, content_type.clone());
        }

        let backend_id = guard.id.clone();
        let copy = stream_body(
            upstream_body,
            sender,
            caller_tx,
            guard,
            self.config.stream_chunk_size,
            self.metrics.clone(),
        );
        tokio::spawn(copy.in_current_span());

        Ok((response, backend_id))
    }

    async fn forward(&self, mut req: Request<Body>, endpoint: &Url) -> Result<Response<Body>, ProxyError> {
        *req.uri_mut() = rewrite_uri(req.uri(), endpoint)?;
        req.headers_mut().remove(HOST);

        let send = self.client.request(req);
        match self.config.upstream_timeout() {
            Some(deadline) => tokio::time::timeout(deadline, send)
                .await
                .map_err(|_| ProxyError::UpstreamTimeout(deadline))?
                .map_err(ProxyError::UpstreamRequest),
            None => send.await.map_err(ProxyError::UpstreamRequest),
        }
    }

    fn report_connections(&self, guard: &ConnectionGuard) {
        self.report_connections_for(&guard.id, guard.active_connections());
    }

    fn report_connections_for(&self, backend: &str, active: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_backend_connections(backend, active);
        }
    }
}

/// Copy the upstream body to the caller in chunks of at most `chunk_size`.
///
/// Each `send_data` resolves only once the previous chunk has been taken by
/// the connection, so output reaches the caller incrementally. The copy stops
/// as soon as the caller drops its body, even while the upstream is idle.
async fn stream_body(
    mut upstream: Body,
    mut sender: Sender,
    mut caller: oneshot::Sender<()>,
    guard: ConnectionGuard,
    chunk_size: usize,
    metrics: Option<Arc<MetricsCollector>>,
) {
    let backend = guard.backend().clone();
    let mut copied = 0usize;
    let mut upstream_failed = false;

    'copy: loop {
        let next = tokio::select! {
            next = upstream.data() => next,
            _ = caller.cancellation() => {
                debug!(backend = %backend.id, copied, "Caller went away, dropping upstream");
                break;
            }
        };

        let mut bytes: Bytes = match next {
            None => break,
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                error!(backend = %backend.id, error = %e, "Error reading from upstream body");
                upstream_failed = true;
                break;
            }
        };

        while !bytes.is_empty() {
            let chunk = bytes.split_to(chunk_size.min(bytes.len()));
            let len = chunk.len();
            if let Err(e) = sender.send_data(chunk).await {
                let err = ProxyError::StreamingWrite(e);
                warn!(backend = %backend.id, copied, %err, "Aborting response stream");
                break 'copy;
            }
            copied += len;
        }
    }

    // Release before `sender` drops so the counter is settled by the time
    // the caller observes end of stream.
    drop(guard);
    if let Some(metrics) = &metrics {
        metrics.set_backend_connections(&backend.id, backend.active_connections());
    }
    debug!(backend = %backend.id, copied, "Response stream finished");

    if upstream_failed {
        // Signal a truncated body instead of a clean end of stream.
        sender.abort();
    }
}

/// Point `uri` at `endpoint`, keeping its path and query.
pub fn rewrite_uri(uri: &Uri, endpoint: &Url) -> Result<Uri, ProxyError> {
    let invalid = |reason: &str| ProxyError::InvalidUpstreamUri(format!("{}: {}", endpoint, reason));

    let scheme: Scheme = endpoint.scheme().parse().map_err(|_| invalid("bad scheme"))?;
    let authority: Authority = endpoint[url::Position::BeforeHost..url::Position::AfterPort]
        .parse()
        .map_err(|_| invalid("bad authority"))?;

    let mut parts = uri.clone().into_parts();
    parts.scheme = Some(scheme);
    parts.authority = Some(authority);
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }

    Uri::from_parts(parts).map_err(|e| invalid(&e.to_string()))
}

/// Milliseconds with microsecond precision, e.g. `12.345ms`.
fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3}ms", elapsed.as_secs_f64() * 1000.0)
}

fn ensure_request_id(req: &mut Request<Body>) -> String {
    if let Some(id) = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        return id.to_string();
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    id
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no healthy upstream")]
    NoHealthyUpstream,

    #[error("{0}")]
    UpstreamRequest(#[source] hyper::Error),

    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("invalid upstream uri {0}")]
    InvalidUpstreamUri(String),

    #[error("error writing response to client: {0}")]
    StreamingWrite(#[source] hyper::Error),

    #[error("invalid timing header name {0:?}")]
    InvalidTimingHeader(String),
}

// Every proxy failure surfaces to the caller as 502 with a plain-text body.
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let mut response = Response::new(Body::from(err.to_string()));
        *response.status_mut() = StatusCode::BAD_GATEWAY;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}
