//! One pooled connection set bound to a single `(instance, database)`.

use std::fmt;
use std::time::Duration;

use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime, Timeouts};
use futures_util::future::join_all;
use redis::{Cmd, FromRedisValue};
use url::Url;

use super::{CacheError, CacheKey};
use crate::config::CacheInstanceConfig;
use crate::resilience::Backoff;

const CLOSE_POLL: Duration = Duration::from_millis(10);

/// Pooled client for one logical database.
///
/// Pool parameters are fixed at construction. No connection is opened until
/// the first command, [`probe`](Self::probe) or [`warm`](Self::warm).
pub struct CacheClient {
    key: CacheKey,
    endpoint: String,
    pool: Pool,
    io_timeout: Duration,
    max_retries: u32,
    min_idle: usize,
}

impl fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClient")
            .field("key", &self.key)
            .field("endpoint", &self.endpoint)
            .field("status", &self.pool.status())
            .finish()
    }
}

/// `redis://[:password@]host:port/database`, bracketing IPv6 hosts.
pub fn connection_url(config: &CacheInstanceConfig, database: i64) -> Result<String, String> {
    let host = if config.address.contains(':') {
        format!("[{}]", config.address)
    } else {
        config.address.clone()
    };
    let mut url = Url::parse(&format!("redis://{host}:{}/{database}", config.port)).map_err(|e| e.to_string())?;
    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        url.set_password(Some(password))
            .map_err(|()| "address cannot carry a password".to_string())?;
    }
    Ok(url.into())
}

impl CacheClient {
    pub fn new(key: CacheKey, config: &CacheInstanceConfig) -> Result<Self, CacheError> {
        let url = connection_url(config, key.database).map_err(|reason| CacheError::Endpoint {
            key: key.clone(),
            reason,
        })?;

        let dial = Duration::from_secs(config.dial_timeout_secs);
        let mut pool_config = PoolConfig::new(config.max_connections);
        pool_config.timeouts = Timeouts {
            wait: Some(dial),
            create: Some(dial),
            recycle: Some(dial),
        };
        let mut deadpool = Config::from_url(url);
        deadpool.pool = Some(pool_config);

        let pool = deadpool
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Endpoint {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            endpoint: format!("{}:{}", config.address, config.port),
            key,
            pool,
            io_timeout: Duration::from_secs(config.read_timeout_secs.max(config.write_timeout_secs)),
            max_retries: config.max_retries,
            min_idle: config.min_idle,
        })
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Connections currently held by the pool (idle and in use).
    pub fn open_connections(&self) -> usize {
        self.pool.status().size
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Check out one pooled connection, bounded by the dial timeout.
    ///
    /// The pool cannot finish closing while a checked-out connection is alive.
    pub async fn connection(&self) -> Result<Connection, CacheError> {
        self.pool.get().await.map_err(|source| CacheError::Pool {
            key: self.key.clone(),
            source,
        })
    }

    async fn query_once<T>(&self, cmd: &Cmd) -> Result<T, CacheError>
    where
        T: FromRedisValue + Send,
    {
        let mut conn = self.connection().await?;
        match tokio::time::timeout(self.io_timeout, cmd.query_async(&mut conn)).await {
            Ok(result) => result.map_err(|source| CacheError::Command {
                key: self.key.clone(),
                source,
            }),
            Err(_) => Err(CacheError::Timeout {
                key: self.key.clone(),
                after: self.io_timeout,
            }),
        }
    }

    /// Run a command, retrying transient failures up to `max_retries` times.
    async fn query<T>(&self, cmd: &Cmd) -> Result<T, CacheError>
    where
        T: FromRedisValue + Send,
    {
        let mut attempt = 0;
        loop {
            match self.query_once(cmd).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = Backoff::CACHE.delay(attempt);
                    tracing::debug!(
                        cache = %self.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying cache command"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Single PING without retries.
    pub async fn probe(&self) -> Result<(), CacheError> {
        let _: String = self.query_once(&redis::cmd("PING")).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        let _: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(&cmd).await
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key).arg(field).arg(value);
        self.query(&cmd).await
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut cmd = redis::cmd("HGET");
        cmd.arg(key).arg(field);
        self.query(&cmd).await
    }

    /// Open up to `min_idle` connections and return them to the pool.
    ///
    /// Returns how many were opened; failures are left to the first real command.
    pub async fn warm(&self) -> usize {
        let attempts = (0..self.min_idle).map(|_| self.pool.get());
        let connections: Vec<_> = join_all(attempts).await.into_iter().filter_map(Result::ok).collect();
        connections.len()
    }

    /// Stop handing out connections and wait until every one is released.
    ///
    /// Callers bound this with their own deadline.
    pub async fn close(&self) -> Result<(), CacheError> {
        if self.pool.is_closed() {
            return Err(CacheError::Closed);
        }
        self.pool.close();
        while self.pool.status().size > 0 {
            tokio::time::sleep(CLOSE_POLL).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(address: &str) -> CacheInstanceConfig {
        CacheInstanceConfig::new("default", address, 6380, vec![2])
    }

    #[test]
    fn url_carries_database_and_password() {
        let mut config = instance("cache.local");
        assert_eq!(connection_url(&config, 2).unwrap(), "redis://cache.local:6380/2");

        config.password = Some("s3cr:et".to_string());
        let url = connection_url(&config, 2).unwrap();
        assert!(url.starts_with("redis://:"));
        assert!(url.ends_with("@cache.local:6380/2"));
        assert!(!url.contains("s3cr:et"));
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(connection_url(&instance("::1"), 0).unwrap(), "redis://[::1]:6380/0");
    }

    #[tokio::test]
    async fn construction_is_lazy() {
        let client = CacheClient::new(CacheKey::new("default", 2), &instance("127.0.0.1")).unwrap();
        assert_eq!(client.open_connections(), 0);
        assert_eq!(client.endpoint(), "127.0.0.1:6380");
    }

    #[tokio::test]
    async fn close_twice_reports_closed() {
        let client = CacheClient::new(CacheKey::new("default", 2), &instance("127.0.0.1")).unwrap();
        assert!(client.close().await.is_ok());
        assert!(client.is_closed());
        assert!(matches!(client.close().await, Err(CacheError::Closed)));
    }

    fn unreachable() -> CacheClient {
        let mut config = CacheInstanceConfig::new("default", "127.0.0.1", 1, vec![0]);
        config.dial_timeout_secs = 1;
        config.max_retries = 2;
        CacheClient::new(CacheKey::new("default", 0), &config).unwrap()
    }

    #[tokio::test]
    async fn unreachable_backend_fails_probe() {
        assert!(unreachable().probe().await.is_err());
    }

    #[tokio::test]
    async fn unreachable_backend_fails_commands_after_retries() {
        let client = unreachable();
        assert!(matches!(client.ping().await, Err(CacheError::Pool { .. })));
        assert!(matches!(client.get("greeting").await, Err(CacheError::Pool { .. })));
        assert_eq!(client.open_connections(), 0);
    }

    #[tokio::test]
    async fn closed_pool_refuses_checkout() {
        let client = unreachable();
        client.close().await.unwrap();
        let err = client.get("greeting").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
