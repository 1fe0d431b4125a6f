//! Tower middleware releasing read stickiness per inbound request.
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use tower::Layer;
use tower::Service;

use crate::connection::StickinessRegistry;

/// Resets the stickiness of every registered connection before each request
/// reaches the inner service.
#[derive(Clone, Debug)]
pub struct ResetStickinessLayer {
    registry: Arc<StickinessRegistry>,
}

impl ResetStickinessLayer {
    pub fn new(registry: Arc<StickinessRegistry>) -> Self {
        Self { registry }
    }
}

impl<S> Layer<S> for ResetStickinessLayer {
    type Service = ResetStickinessService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResetStickinessService {
            inner,
            registry: self.registry.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResetStickinessService<S> {
    inner: S,
    registry: Arc<StickinessRegistry>,
}

impl<S, Request> Service<Request> for ResetStickinessService<S>
where
    S: Service<Request>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        self.registry.reset_all();
        self.inner.call(request)
    }
}
