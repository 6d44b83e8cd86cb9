//! Business routes.
//!
//! Deliberately small: they exist so every stage has something real to wrap,
//! including a cache round trip through the registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::cache::CacheRegistry;
use crate::http::error::AppError;
use crate::http::response::{code, ApiResponse};

/// Hash holding saved records, one field per record id.
pub const RECORDS_HASH: &str = "gatehouse:records";

/// Registry entry used by the record routes.
pub const RECORDS_CACHE: (&str, i64) = ("default", 0);

/// Shared state for handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: Arc<CacheRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<CacheRegistry>) -> Self {
        Self { registry }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordQuery {
    #[serde(default)]
    pub id: String,
}

fn check_id(id: &str, fields: &mut BTreeMap<String, String>) {
    if id.is_empty() {
        fields.insert("id".to_string(), "must not be empty".to_string());
    } else if !id.bytes().all(|b| b.is_ascii_digit()) {
        fields.insert("id".to_string(), "must be numeric".to_string());
    }
}

impl Record {
    fn validate(&self) -> Result<(), AppError> {
        let mut fields = BTreeMap::new();
        check_id(&self.id, &mut fields);
        if self.value.is_empty() {
            fields.insert("value".to_string(), "must not be empty".to_string());
        }
        if fields.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(fields))
        }
    }
}

pub async fn health() -> ApiResponse {
    ApiResponse::success(serde_json::json!({ "status": "ok" }))
}

pub async fn save_record(
    State(state): State<AppState>,
    payload: Result<Json<Record>, JsonRejection>,
) -> Result<ApiResponse<Record>, AppError> {
    let Json(record) = payload.map_err(|rejection| AppError::invalid("body", &rejection.body_text()))?;
    record.validate()?;

    let (name, database) = RECORDS_CACHE;
    let client = state.registry.lookup(name, database)?;
    client
        .hset(RECORDS_HASH, &record.id, &serde_json::to_string(&record)?)
        .await?;

    tracing::debug!(id = %record.id, "Record saved");
    Ok(ApiResponse::success(record))
}

pub async fn get_record(
    State(state): State<AppState>,
    query: Result<Query<RecordQuery>, QueryRejection>,
) -> Result<ApiResponse<Record>, AppError> {
    let Query(query) = query.map_err(|rejection| AppError::invalid("query", &rejection.body_text()))?;
    let mut fields = BTreeMap::new();
    check_id(&query.id, &mut fields);
    if !fields.is_empty() {
        return Err(AppError::Validation(fields));
    }

    let (name, database) = RECORDS_CACHE;
    let client = state.registry.lookup(name, database)?;
    let record = match client.hget(RECORDS_HASH, &query.id).await? {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };
    Ok(ApiResponse::new(code::SUCCESS, "request succeeded", record))
}

pub async fn not_found() -> Response {
    ApiResponse::<()>::new(code::ERROR, "route not found", None).with_status(StatusCode::NOT_FOUND)
}

/// Known path, unsupported method.
pub async fn method_not_allowed() -> Response {
    ApiResponse::<()>::new(code::ERROR, "method not allowed", None).with_status(StatusCode::METHOD_NOT_ALLOWED)
}
