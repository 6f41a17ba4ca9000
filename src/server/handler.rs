// src/server/handler.rs
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;

use crate::proxy::Proxy;

/// Tower service in front of the proxy. Never fails; errors are already 502s.
#[derive(Clone)]
pub struct RequestHandler {
    proxy: Arc<Proxy>,
}

impl RequestHandler {
    pub fn new(proxy: Arc<Proxy>) -> Self {
        Self { proxy }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let proxy = self.proxy.clone();
        Box::pin(async move { Ok(proxy.handle(req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoadBalancerAlgorithm, ProxyConfig};
    use crate::load_balancer::Balancer;
    use hyper::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn empty_pool_answers_bad_gateway() {
        let balancer = Arc::new(Balancer::new(LoadBalancerAlgorithm::RoundRobin));
        let proxy = Arc::new(Proxy::new(balancer, ProxyConfig::default(), None).unwrap());
        let handler = RequestHandler::new(proxy);

        let response = handler
            .oneshot(Request::new(Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().contains_key("x-processing-time"));
    }
}
