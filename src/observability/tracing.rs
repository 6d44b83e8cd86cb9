//! Per-request correlation.
//!
//! The trace stage mints a random identifier, stores it in the request's
//! [`RequestContext`], and runs the rest of the chain inside a `request` span
//! so every log line below it carries `trace_id`.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderValue, Request},
    response::Response,
};
use tracing::Instrument;

use crate::http::middleware::{Next, Stage};
use crate::http::request::{RequestContext, TraceId, X_REQUEST_ID};

/// Attaches a fresh correlation identifier to every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceContext;

#[async_trait]
impl Stage for TraceContext {
    fn name(&self) -> &'static str {
        "trace_context"
    }

    async fn handle(&self, mut request: Request<Body>, next: Next) -> Response {
        let context = RequestContext::new(TraceId::generate(), &request);
        let span = tracing::info_span!(
            "request",
            trace_id = %context.trace_id(),
            method = %request.method(),
            path = %request.uri().path(),
        );
        let trace_id = context.trace_id().clone();
        request.extensions_mut().insert(context);

        let mut response = next.run(request).instrument(span).await;
        if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
        response
    }
}
