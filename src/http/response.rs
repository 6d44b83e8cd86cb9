//! Uniform response envelope.
//!
//! Every stage and handler answers with `{ "code", "msg", "data" }`. Business
//! outcomes travel with HTTP 200; only admission rejection (429), policy
//! rejection (403) and unrecovered faults (500) use a real HTTP status.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Application-level result codes carried in the envelope.
pub mod code {
    pub const SUCCESS: i32 = 200;
    pub const FORBIDDEN: i32 = 403;
    pub const VALIDATION: i32 = 422;
    pub const TOO_MANY_REQUESTS: i32 = 429;
    pub const ERROR: i32 = 500;
}

/// Response body shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T = serde_json::Value> {
    pub code: i32,
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn new(code: i32, msg: impl Into<String>, data: Option<T>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data,
        }
    }

    pub fn success(data: T) -> Self {
        Self::new(code::SUCCESS, "request succeeded", Some(data))
    }
}

impl ApiResponse<()> {
    /// Generic failure; the specific cause is only logged.
    pub fn error() -> Self {
        Self::new(code::ERROR, "request failed", None)
    }
}

impl ApiResponse<BTreeMap<String, String>> {
    /// Caller input rejected, with one reason per field.
    pub fn validation(fields: BTreeMap<String, String>) -> Self {
        Self::new(code::VALIDATION, "request parameter validation failed", Some(fields))
    }
}

impl<T: Serialize> ApiResponse<T> {
    /// Render with an explicit HTTP status.
    pub fn with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        self.with_status(StatusCode::OK)
    }
}

/// Terminal response for a stage that stops the chain.
pub fn reject(status: StatusCode, code: i32, msg: &str) -> Response {
    ApiResponse::<()>::new(code, msg, None).with_status(status)
}
