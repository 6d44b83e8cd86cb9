//! Cross-origin policy stage.

use std::collections::HashSet;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, header::InvalidHeaderValue, HeaderMap, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};

use crate::config::CorsConfig;
use crate::http::middleware::{Next, Stage};
use crate::http::response::{code, reject};
use crate::observability::metrics;

/// Validates the `Origin` header against a fixed allow-set and emits CORS headers.
///
/// - CORS headers are set on every response, whatever stops the chain.
/// - `OPTIONS` always gets `204 No Content`, even for origins that are not allowed.
/// - In relaxed (debug) mode every origin passes.
/// - Otherwise the origin must exactly equal an allow-set entry, or the
///   request ends with `403`.
#[derive(Debug)]
pub struct OriginGuard {
    allowed: HashSet<String>,
    relaxed: bool,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    expose_headers: HeaderValue,
    allow_credentials: bool,
    max_age: HeaderValue,
}

impl OriginGuard {
    /// Build the guard; fails if a configured value is not a legal header value.
    pub fn new(config: &CorsConfig, relaxed: bool) -> Result<Self, InvalidHeaderValue> {
        Ok(Self {
            allowed: config.allow_origins.iter().cloned().collect(),
            relaxed,
            allow_methods: HeaderValue::from_str(&config.allow_methods)?,
            allow_headers: HeaderValue::from_str(&config.allow_headers)?,
            expose_headers: HeaderValue::from_str(&config.expose_headers)?,
            allow_credentials: config.allow_credentials,
            max_age: HeaderValue::from(config.max_age_secs),
        })
    }

    /// Exact membership test.
    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed.contains(origin)
    }

    fn apply_headers(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        if let Some(origin) = origin {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        }
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
        headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, self.expose_headers.clone());
        if self.allow_credentials {
            headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
    }
}

#[async_trait]
impl Stage for OriginGuard {
    fn name(&self) -> &'static str {
        "origin_guard"
    }

    async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        let origin = request.headers().get(header::ORIGIN).cloned();

        let mut response = if request.method() == Method::OPTIONS {
            StatusCode::NO_CONTENT.into_response()
        } else if self.relaxed {
            next.run(request).await
        } else if origin
            .as_ref()
            .and_then(|v| v.to_str().ok())
            .is_some_and(|o| self.is_allowed(o))
        {
            next.run(request).await
        } else {
            tracing::warn!(
                origin = ?origin,
                path = %request.uri().path(),
                "Cross-origin check failed"
            );
            metrics::record_policy_rejection("origin");
            reject(StatusCode::FORBIDDEN, code::FORBIDDEN, "cross-origin check failed")
        };

        self.apply_headers(origin.as_ref(), response.headers_mut());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::middleware::StageLayer;
    use axum::{routing::get, Router};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn config() -> CorsConfig {
        CorsConfig {
            allow_origins: vec!["https://a.example".to_string()],
            ..CorsConfig::default()
        }
    }

    fn app(relaxed: bool) -> Router {
        let guard = OriginGuard::new(&config(), relaxed).unwrap();
        Router::new()
            .route("/", get(|| async { "ok" }).post(|| async { "ok" }))
            .layer(StageLayer::new(vec![Arc::new(guard)]))
    }

    fn request(method: Method, origin: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/");
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn allowed_origin_passes_with_headers() {
        let response = app(false)
            .oneshot(request(Method::GET, Some("https://a.example")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://a.example");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");
    }

    #[tokio::test]
    async fn unknown_origin_is_forbidden() {
        let response = app(false)
            .oneshot(request(Method::POST, Some("https://b.example")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    }

    #[tokio::test]
    async fn missing_origin_is_forbidden() {
        let response = app(false).oneshot(request(Method::GET, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn origin_match_is_exact() {
        let response = app(false)
            .oneshot(request(Method::GET, Some("https://a.example.evil")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn preflight_succeeds_for_any_origin() {
        for origin in [Some("https://a.example"), Some("https://b.example"), None] {
            let response = app(false).oneshot(request(Method::OPTIONS, origin)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
            assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_HEADERS));
        }
    }

    #[tokio::test]
    async fn relaxed_mode_passes_every_origin() {
        let response = app(true)
            .oneshot(request(Method::GET, Some("https://b.example")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn rejects_illegal_header_values() {
        let mut bad = config();
        bad.allow_headers = "bad\nvalue".to_string();
        assert!(OriginGuard::new(&bad, false).is_err());
    }
}
