//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + --port override
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → handed to each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no runtime reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuthConfig, CacheConfig, CacheInstanceConfig, CorsConfig, ListenerConfig, LogConfig, LogFormat,
    MetricsConfig, RateLimitConfig, ServiceConfig,
};
pub use validation::{validate_config, ValidationError};
