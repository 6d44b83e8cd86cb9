use std::time::Duration;

use deadpool_redis::PoolError;
use redis::RedisError;

use super::CacheKey;

/// Errors from the cache registry and its clients.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache client {0} is not configured")]
    NotConfigured(CacheKey),

    #[error("cache client {0} registered twice")]
    Duplicate(CacheKey),

    #[error("cache registry is closed")]
    Closed,

    #[error("cache {key}: invalid endpoint: {reason}")]
    Endpoint { key: CacheKey, reason: String },

    #[error("cache {key}: no connection available: {source}")]
    Pool {
        key: CacheKey,
        #[source]
        source: PoolError,
    },

    #[error("cache {key}: command failed: {source}")]
    Command {
        key: CacheKey,
        #[source]
        source: RedisError,
    },

    #[error("cache {key}: no reply within {after:?}")]
    Timeout { key: CacheKey, after: Duration },
}

impl CacheError {
    /// Whether retrying the same command could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CacheError::Pool { source, .. } => matches!(source, PoolError::Timeout(_) | PoolError::Backend(_)),
            CacheError::Command { source, .. } => {
                source.is_io_error()
                    || source.is_timeout()
                    || source.is_connection_dropped()
                    || source.is_connection_refusal()
            }
            CacheError::Timeout { .. } => true,
            _ => false,
        }
    }
}
