//! Per-request write deadline.
//!
//! Runs inside the access logger and the header-setting stages, so a request
//! that runs out of time is still logged and still carries CORS and
//! correlation headers.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};

use crate::config::ListenerConfig;
use crate::http::error::ErrorDetail;
use crate::http::middleware::{Next, Stage};
use crate::http::response::{code, reject};

pub const TIMED_OUT_MSG: &str = "request timed out";

/// Bounds the rest of the chain; expiry answers 503 with an envelope.
#[derive(Debug, Clone, Copy)]
pub struct RequestDeadline {
    limit: Duration,
}

impl RequestDeadline {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    pub fn from_config(config: &ListenerConfig) -> Self {
        Self::new(Duration::from_secs(config.write_timeout_secs))
    }
}

#[async_trait]
impl Stage for RequestDeadline {
    fn name(&self) -> &'static str {
        "request_deadline"
    }

    async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        let path = request.uri().path().to_string();
        match tokio::time::timeout(self.limit, next.run(request)).await {
            Ok(response) => response,
            Err(_) => {
                let timeout_ms = self.limit.as_millis() as u64;
                tracing::warn!(path = %path, timeout_ms, "Request timed out");
                let mut response = reject(StatusCode::SERVICE_UNAVAILABLE, code::ERROR, TIMED_OUT_MSG);
                response
                    .extensions_mut()
                    .insert(ErrorDetail(format!("write timeout after {timeout_ms}ms")));
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::middleware::StageLayer;
    use axum::{routing::get, Router};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(limit: Duration) -> Router {
        Router::new()
            .route("/fast", get(|| async { "fast" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "slow"
                }),
            )
            .layer(StageLayer::new(vec![Arc::new(RequestDeadline::new(limit))]))
    }

    #[tokio::test]
    async fn fast_requests_are_untouched() {
        let response = app(Duration::from_millis(500))
            .oneshot(Request::builder().uri("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.extensions().get::<ErrorDetail>().is_none());
    }

    #[tokio::test]
    async fn expiry_answers_503_with_detail() {
        let response = app(Duration::from_millis(50))
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.extensions().get::<ErrorDetail>().is_some());

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], code::ERROR);
        assert_eq!(body["msg"], TIMED_OUT_MSG);
    }
}
