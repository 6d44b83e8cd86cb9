//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Relaxed mode: every origin passes the origin guard.
    pub debug: bool,

    /// Interface to bind.
    pub host: String,

    /// Listen port. `0` asks the OS for an ephemeral port.
    pub port: u16,

    /// Listener limits and shutdown grace period.
    pub listener: ListenerConfig,

    /// Global admission control.
    pub rate_limit: RateLimitConfig,

    /// Cross-origin policy.
    pub cors: CorsConfig,

    /// Static credential for protected routes.
    pub auth: AuthConfig,

    /// Log level and format.
    pub log: LogConfig,

    /// Prometheus exporter.
    pub metrics: MetricsConfig,

    /// Cache backend instances.
    pub cache: CacheConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            debug: false,
            host: "0.0.0.0".to_string(),
            port: 8080,
            listener: ListenerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
            auth: AuthConfig::default(),
            log: LogConfig::default(),
            metrics: MetricsConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Socket address string for the listener.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Time allowed for a client to send the request head.
    pub read_timeout_secs: u64,

    /// Time allowed to produce a response once the head is read.
    pub write_timeout_secs: u64,

    /// Upper bound on the request head size in bytes.
    pub max_header_bytes: usize,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Grace period shared by connection draining and cache teardown.
    pub shutdown_grace_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 5,
            write_timeout_secs: 10,
            max_header_bytes: 1 << 20,
            max_connections: 10_000,
            shutdown_grace_secs: 5,
        }
    }
}

/// Rate limiting configuration.
///
/// A single bucket is shared by every caller.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    pub requests_per_second: f64,

    /// Bucket capacity (and initial token count).
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 100.0,
            burst: 100,
        }
    }
}

/// Cross-origin policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Exact origins accepted outside debug mode.
    pub allow_origins: Vec<String>,

    pub allow_methods: String,

    pub allow_headers: String,

    pub expose_headers: String,

    pub allow_credentials: bool,

    /// Preflight cache lifetime.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            allow_methods: "GET, POST, PUT, DELETE, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization, clientId".to_string(),
            expose_headers: "x-request-id".to_string(),
            allow_credentials: true,
            max_age_secs: 86_400,
        }
    }
}

/// Default credential; never accepted by validation.
pub const PLACEHOLDER_CLIENT_ID: &str = "CHANGE_ME_IN_PRODUCTION";

/// Static credential check for the protected route group.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Header carrying the credential.
    pub header: String,

    /// Expected header value.
    pub client_id: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header: "clientId".to_string(),
            client_id: PLACEHOLDER_CLIENT_ID.to_string(),
        }
    }
}

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive (trace, debug, info, warn, error, or a full `EnvFilter` string).
    pub level: String,

    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Metrics exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Scrape endpoint bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Cache backend section.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    pub instances: Vec<CacheInstanceConfig>,
}

/// One cache backend endpoint and the logical databases opened on it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheInstanceConfig {
    /// Instance name used for lookups.
    pub name: String,

    /// Host name or IP address.
    pub address: String,

    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    /// Logical database indices; one pool is opened per index.
    pub databases: Vec<i64>,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connections opened eagerly after the startup probe.
    #[serde(default = "default_min_idle")]
    pub min_idle: usize,

    #[serde(default = "default_cache_timeout")]
    pub dial_timeout_secs: u64,

    #[serde(default = "default_cache_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_cache_timeout")]
    pub write_timeout_secs: u64,

    /// Retries for transient command failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl CacheInstanceConfig {
    /// Instance with default pool sizing.
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16, databases: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            password: None,
            databases,
            max_connections: default_max_connections(),
            min_idle: default_min_idle(),
            dial_timeout_secs: default_cache_timeout(),
            read_timeout_secs: default_cache_timeout(),
            write_timeout_secs: default_cache_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_connections() -> usize {
    100
}

fn default_min_idle() -> usize {
    10
}

fn default_cache_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    5
}
