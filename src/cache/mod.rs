//! Cache subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     config.cache.instances
//!         → registry.rs (one client per (name, database), probe all, fail fast)
//!         → client.rs (lazy deadpool pool, warmed to min_idle)
//!
//! Request:
//!     handler → registry.lookup(name, db) → client.hget / hset / get
//!
//! Shutdown:
//!     registry.close_all(budget) → every client.close() concurrently
//! ```
//!
//! # Design Decisions
//! - The registry never creates clients after startup
//! - Every command is bounded by the client's I/O timeout
//! - Lookups after shutdown fail with [`CacheError::Closed`]

pub mod client;
pub mod error;
pub mod registry;

use std::fmt;

pub use client::CacheClient;
pub use error::CacheError;
pub use registry::{CacheRegistry, CloseReport};

/// Registry key: instance name plus logical database index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub name: String,
    pub database: i64,
}

impl CacheKey {
    pub fn new(name: impl Into<String>, database: i64) -> Self {
        Self {
            name: name.into(),
            database,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.database)
    }
}
