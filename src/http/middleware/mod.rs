//! Ordered request stages.
//!
//! # Data Flow
//! ```text
//! Request → StageService
//!     → stages[0].handle(req, next)
//!         → next.run(req) → stages[1].handle(req, next) → ... → inner service
//!     ← response unwinds back through every stage that called next.run
//! ```
//!
//! A stage either calls `next.run` to continue, or returns its own response to
//! stop the chain. Code after `next.run(..).await` observes the final response.
//! The stage list is fixed when the layer is built.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response};
use futures_util::future::BoxFuture;
use tower::{util::BoxCloneService, Layer, Service, ServiceExt};

/// One cross-cutting unit of the request pipeline.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Handle a request, either short-circuiting or delegating to `next`.
    async fn handle(&self, request: Request<Body>, next: Next) -> Response;
}

type Endpoint = BoxCloneService<Request<Body>, Response, Infallible>;

/// The remainder of the chain after the current stage.
pub struct Next {
    stages: Arc<[Arc<dyn Stage>]>,
    position: usize,
    endpoint: Endpoint,
}

impl Next {
    fn new(stages: Arc<[Arc<dyn Stage>]>, endpoint: Endpoint) -> Self {
        Self {
            stages,
            position: 0,
            endpoint,
        }
    }

    /// Run the remaining stages and the endpoint.
    pub fn run(mut self, request: Request<Body>) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            match self.stages.get(self.position).cloned() {
                Some(stage) => {
                    self.position += 1;
                    stage.handle(request, self).await
                }
                None => match self.endpoint.oneshot(request).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                },
            }
        })
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &(self.stages.len() - self.position))
            .finish()
    }
}

/// Tower layer running a fixed list of stages in front of a service.
#[derive(Clone)]
pub struct StageLayer {
    stages: Arc<[Arc<dyn Stage>]>,
}

impl StageLayer {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// Stage names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl fmt::Debug for StageLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageLayer").field("stages", &self.names()).finish()
    }
}

impl<S> Layer<S> for StageLayer {
    type Service = StageService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StageService {
            stages: self.stages.clone(),
            inner,
        }
    }
}

/// Service produced by [`StageLayer`].
#[derive(Clone)]
pub struct StageService<S> {
    stages: Arc<[Arc<dyn Stage>]>,
    inner: S,
}

impl<S> Service<Request<Body>> for StageService<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // Hand the readied service to the chain and keep a fresh clone.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let next = Next::new(self.stages.clone(), BoxCloneService::new(inner));
        Box::pin(async move { Ok(next.run(request).await) })
    }
}
