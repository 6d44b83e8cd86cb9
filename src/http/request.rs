//! Per-request context and request inspection helpers.
//!
//! # Responsibilities
//! - Carry the correlation identifier attached by the trace stage
//! - Resolve the caller address (proxy headers, then socket peer)
//! - Render a header-only dump of a request for fault logs

use std::fmt;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, MatchedPath},
    http::{header, HeaderMap, HeaderName, Request},
};
use uuid::Uuid;

/// Response header echoing the correlation identifier.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Random per-request correlation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    /// Fresh random identifier (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Context attached to every request by the trace stage.
///
/// Created once at pipeline entry and read-only afterwards.
#[derive(Debug, Clone)]
pub struct RequestContext {
    trace_id: TraceId,
    route: Option<String>,
}

impl RequestContext {
    pub fn new<B>(trace_id: TraceId, request: &Request<B>) -> Self {
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string());
        Self { trace_id, route }
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    /// Route template the request matched, if any.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }
}

/// Extension trait for reading the context off a request.
pub trait RequestContextExt {
    fn context(&self) -> Option<&RequestContext>;
}

impl<B> RequestContextExt for Request<B> {
    fn context(&self) -> Option<&RequestContext> {
        self.extensions().get::<RequestContext>()
    }
}

/// Caller address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
pub fn client_ip<B>(request: &Request<B>) -> String {
    forwarded_ip(request.headers())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// Header-only snapshot of a request, rendered on one line.
#[derive(Debug, Clone)]
pub struct RequestDump(String);

impl RequestDump {
    pub fn capture<B>(request: &Request<B>) -> Self {
        let mut dump = format!("{} {} {:?}", request.method(), request.uri(), request.version());
        for (name, value) in request.headers() {
            // Credentials stay out of fault logs.
            let value = if name == header::AUTHORIZATION || name == header::COOKIE {
                "<redacted>"
            } else {
                value.to_str().unwrap_or("<binary>")
            };
            dump.push(' ');
            dump.push_str(name.as_str());
            dump.push_str(": ");
            dump.push_str(value);
        }
        Self(dump)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
