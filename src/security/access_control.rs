//! Static credential check for protected route groups.
//!
//! This is a placeholder trust boundary: one shared secret compared verbatim.
//! There is no expiry, rotation, or per-caller identity.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderName, Request, StatusCode},
    response::Response,
};

use crate::config::AuthConfig;
use crate::http::middleware::{Next, Stage};
use crate::http::response::{code, reject};
use crate::observability::metrics;

/// Error building an [`AuthGuard`].
#[derive(Debug, thiserror::Error)]
#[error("invalid auth header name {0:?}")]
pub struct InvalidAuthHeader(String);

/// Rejects requests whose credential header does not equal the configured secret.
#[derive(Debug)]
pub struct AuthGuard {
    header: HeaderName,
    secret: String,
}

impl AuthGuard {
    pub fn new(config: &AuthConfig) -> Result<Self, InvalidAuthHeader> {
        let header = HeaderName::try_from(config.header.as_str())
            .map_err(|_| InvalidAuthHeader(config.header.clone()))?;
        Ok(Self {
            header,
            secret: config.client_id.clone(),
        })
    }

    fn is_authorized<B>(&self, request: &Request<B>) -> bool {
        request
            .headers()
            .get(&self.header)
            .is_some_and(|v| v.as_bytes() == self.secret.as_bytes())
    }
}

#[async_trait]
impl Stage for AuthGuard {
    fn name(&self) -> &'static str {
        "auth_guard"
    }

    async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        if self.is_authorized(&request) {
            return next.run(request).await;
        }

        tracing::warn!(path = %request.uri().path(), "Missing or invalid client credential");
        metrics::record_policy_rejection("auth");
        reject(StatusCode::FORBIDDEN, code::FORBIDDEN, "no permission")
    }
}
