//! Gatehouse: an HTTP service front end.
//!
//! Every request passes a fixed chain of stages (trace context, origin
//! policy, global rate gate, access log, panic recovery, write deadline, and
//! credential checks on protected routes) before reaching a handler, which may use
//! pooled cache clients from a registry owned by the service lifecycle.

pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod security;

pub use cache::{CacheClient, CacheError, CacheKey, CacheRegistry};
pub use config::ServiceConfig;
pub use http::{HttpServer, Pipeline};
pub use lifecycle::{ConfigSource, Lifecycle, Phase, Shutdown, ShutdownReport, StartupError};
