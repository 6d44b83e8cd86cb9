//! One structured record per completed request.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request},
    response::Response,
};

use crate::http::error::ErrorDetail;
use crate::http::middleware::{Next, Stage};
use crate::http::request::{client_ip, RequestContextExt};
use crate::observability::metrics;

/// Immutable snapshot of a finished request.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub time_ms: u128,
    pub status: u16,
    pub method: String,
    pub path: String,
    pub query: String,
    pub ip: String,
    pub user_agent: String,
    pub error: String,
    pub latency: Duration,
    pub host: String,
    pub trace_id: String,
}

impl AccessRecord {
    fn emit(&self) {
        let latency_ms = self.latency.as_secs_f64() * 1000.0;
        if self.status >= 400 {
            tracing::error!(
                time_ms = self.time_ms as u64,
                status = self.status,
                method = %self.method,
                path = %self.path,
                query = %self.query,
                ip = %self.ip,
                user_agent = %self.user_agent,
                error = %self.error,
                latency_ms,
                host = %self.host,
                trace_id = %self.trace_id,
                "access"
            );
        } else {
            tracing::info!(
                time_ms = self.time_ms as u64,
                status = self.status,
                method = %self.method,
                path = %self.path,
                query = %self.query,
                ip = %self.ip,
                user_agent = %self.user_agent,
                error = %self.error,
                latency_ms,
                host = %self.host,
                trace_id = %self.trace_id,
                "access"
            );
        }
    }
}

/// Logs the final status of everything downstream of it.
///
/// Sits outside the recovery guard so a recovered fault is recorded with the
/// substituted status.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessLogger;

fn header_str<B>(request: &Request<B>, name: header::HeaderName) -> String {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Stage for AccessLogger {
    fn name(&self) -> &'static str {
        "access_logger"
    }

    async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        let start = Instant::now();
        let time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let method = request.method().to_string();
        let path = request.uri().path().to_string();
        let query = request.uri().query().unwrap_or_default().to_string();
        let ip = client_ip(&request);
        let user_agent = header_str(&request, header::USER_AGENT);
        let host = header_str(&request, header::HOST);
        let trace_id = request
            .context()
            .map(|c| c.trace_id().to_string())
            .unwrap_or_default();

        let response = next.run(request).await;

        let latency = start.elapsed();
        let status = response.status().as_u16();
        metrics::record_request(&method, status, latency);

        AccessRecord {
            time_ms,
            status,
            method,
            path,
            query,
            ip,
            user_agent,
            error: response
                .extensions()
                .get::<ErrorDetail>()
                .map(|d| d.0.clone())
                .unwrap_or_default(),
            latency,
            host,
            trace_id,
        }
        .emit();

        response
    }
}
