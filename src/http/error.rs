//! Handler error type.

use std::collections::BTreeMap;

use axum::response::{IntoResponse, Response};

use crate::cache::CacheError;
use crate::http::response::ApiResponse;

/// Internal failure text attached to a response for the access log.
///
/// Lives in the response extensions; never serialized to the client.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

/// Errors a business handler can return.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Caller input error, reported field by field.
    #[error("validation failed on {}", .0.keys().cloned().collect::<Vec<_>>().join(", "))]
    Validation(BTreeMap<String, String>),

    /// Backend unavailable or failing; the cause is logged, not returned.
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Single-field validation failure.
    pub fn invalid(field: &str, reason: &str) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), reason.to_string());
        AppError::Validation(fields)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let detail = ErrorDetail(self.to_string());
        let mut response = match self {
            AppError::Validation(fields) => ApiResponse::validation(fields).into_response(),
            other => {
                tracing::error!(error = %other, "Request failed");
                ApiResponse::error().into_response()
            }
        };
        response.extensions_mut().insert(detail);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::http::response::code;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn backend_cause_is_hidden_from_client() {
        let err = AppError::from(CacheError::NotConfigured(CacheKey::new("default", 3)));
        let response = err.into_response();

        let detail = response.extensions().get::<ErrorDetail>().cloned().unwrap();
        assert!(detail.0.contains("default/3"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ApiResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.code, code::ERROR);
        assert!(!body.msg.contains("default"));
    }

    #[test]
    fn validation_message_names_fields() {
        let err = AppError::invalid("id", "must be numeric");
        assert_eq!(err.to_string(), "validation failed on id");
    }
}
