//! Registry of pooled cache clients keyed by `(name, database)`.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use futures_util::{future::join_all, FutureExt};
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::{CacheClient, CacheError, CacheKey};
use crate::config::CacheInstanceConfig;
use crate::observability::metrics;

/// Outcome of [`CacheRegistry::close_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CloseReport {
    pub closed: Vec<CacheKey>,
    pub failed: Vec<CacheKey>,
    /// Still closing when the budget ran out.
    pub abandoned: Vec<CacheKey>,
}

impl CloseReport {
    /// Every client a close was started for.
    pub fn attempted(&self) -> usize {
        self.closed.len() + self.failed.len() + self.abandoned.len()
    }
}

/// Owns every cache client for the life of the process.
///
/// Populated once during startup, read concurrently while serving, and torn
/// down exactly once by [`close_all`](Self::close_all).
#[derive(Debug, Default)]
pub struct CacheRegistry {
    clients: DashMap<CacheKey, Arc<CacheClient>>,
    closed: AtomicBool,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one client per declared `(name, database)`, probe them all, then
    /// warm each pool to its minimum idle size.
    ///
    /// Any probe failure closes what was opened and fails startup.
    pub async fn connect(instances: &[CacheInstanceConfig]) -> Result<Self, CacheError> {
        let registry = Self::new();
        for instance in instances {
            for &database in &instance.databases {
                let key = CacheKey::new(&instance.name, database);
                registry.register(CacheClient::new(key, instance)?)?;
            }
        }

        let clients = registry.clients();
        let probes = join_all(clients.iter().map(|client| async move { (client, client.probe().await) })).await;
        for (client, result) in probes {
            if let Err(e) = result {
                tracing::error!(cache = %client.key(), endpoint = client.endpoint(), error = %e, "Cache probe failed");
                registry.close_all(Duration::from_secs(1)).await;
                return Err(e);
            }
        }

        let warmed = join_all(clients.iter().map(|client| client.warm())).await;
        for (client, opened) in clients.iter().zip(warmed) {
            tracing::info!(cache = %client.key(), endpoint = client.endpoint(), idle = opened, "Cache client ready");
        }
        Ok(registry)
    }

    /// Add a client. A second client under the same key is rejected.
    pub fn register(&self, client: CacheClient) -> Result<Arc<CacheClient>, CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        match self.clients.entry(client.key().clone()) {
            Entry::Occupied(entry) => Err(CacheError::Duplicate(entry.key().clone())),
            Entry::Vacant(entry) => Ok(entry.insert(Arc::new(client)).value().clone()),
        }
    }

    /// The client for `(name, database)`. Never creates one.
    pub fn lookup(&self, name: &str, database: i64) -> Result<Arc<CacheClient>, CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        let key = CacheKey::new(name, database);
        match self.clients.get(&key) {
            Some(client) => Ok(client.value().clone()),
            None => Err(CacheError::NotConfigured(key)),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<_> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    fn clients(&self) -> Vec<Arc<CacheClient>> {
        self.clients.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Close every client concurrently, giving up on stragglers at `budget`.
    ///
    /// Only the first call does work; later calls return an empty report.
    pub async fn close_all(&self, budget: Duration) -> CloseReport {
        let mut report = CloseReport::default();
        if self.closed.swap(true, Ordering::AcqRel) {
            return report;
        }

        let deadline = Instant::now() + budget;
        let mut pending = HashSet::new();
        let mut tasks = JoinSet::new();
        for client in self.clients() {
            let key = client.key().clone();
            pending.insert(key.clone());
            tasks.spawn(async move {
                let result = AssertUnwindSafe(client.close()).catch_unwind().await;
                (key, result)
            });
        }

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((key, outcome)))) => {
                    pending.remove(&key);
                    match outcome {
                        Ok(Ok(())) => {
                            metrics::record_cache_close("closed");
                            report.closed.push(key);
                        }
                        Ok(Err(e)) => {
                            tracing::error!(cache = %key, error = %e, "Failed to close cache client");
                            metrics::record_cache_close("failed");
                            report.failed.push(key);
                        }
                        Err(_) => {
                            tracing::error!(cache = %key, "Cache client close panicked");
                            metrics::record_cache_close("failed");
                            report.failed.push(key);
                        }
                    }
                }
                Ok(Some(Err(e))) => tracing::error!(error = %e, "Cache close task did not complete"),
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    break;
                }
            }
        }

        for key in pending {
            tracing::warn!(cache = %key, budget_ms = budget.as_millis() as u64, "Cache client close abandoned at deadline");
            metrics::record_cache_close("abandoned");
            report.abandoned.push(key);
        }
        report.closed.sort();
        report.failed.sort();
        report.abandoned.sort();

        self.clients.clear();
        tracing::info!(
            closed = report.closed.len(),
            failed = report.failed.len(),
            abandoned = report.abandoned.len(),
            "Cache registry closed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(pairs: &[(&str, i64)]) -> CacheRegistry {
        let registry = CacheRegistry::new();
        for &(name, db) in pairs {
            let config = CacheInstanceConfig::new(name, "127.0.0.1", 6379, vec![db]);
            registry.register(CacheClient::new(CacheKey::new(name, db), &config).unwrap()).unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn lookup_returns_the_same_handle() {
        let registry = registry_with(&[("default", 0), ("default", 1), ("sessions", 0)]);
        let first = registry.lookup("default", 1).unwrap();
        let second = registry.lookup("default", 1).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.keys(), registry_keys(&[("default", 0), ("default", 1), ("sessions", 0)]));
    }

    #[tokio::test]
    async fn unknown_pair_is_not_configured() {
        let registry = registry_with(&[("default", 0)]);
        match registry.lookup("default", 7) {
            Err(CacheError::NotConfigured(key)) => assert_eq!(key, CacheKey::new("default", 7)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(registry.lookup("other", 0).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected() {
        let registry = registry_with(&[("default", 0)]);
        let config = CacheInstanceConfig::new("default", "10.0.0.9", 6379, vec![0]);
        let again = CacheClient::new(CacheKey::new("default", 0), &config).unwrap();
        assert!(matches!(registry.register(again), Err(CacheError::Duplicate(_))));
    }

    #[tokio::test]
    async fn close_all_reports_every_client_once() {
        let registry = registry_with(&[("default", 0), ("default", 1), ("sessions", 3)]);
        let report = registry.close_all(Duration::from_secs(2)).await;
        assert_eq!(report.attempted(), 3);
        assert_eq!(report.closed, registry_keys(&[("default", 0), ("default", 1), ("sessions", 3)]));

        assert!(matches!(registry.lookup("default", 0), Err(CacheError::Closed)));
        assert_eq!(registry.close_all(Duration::from_secs(2)).await.attempted(), 0);
    }

    #[tokio::test]
    async fn connect_fails_fast_on_unreachable_backend() {
        let mut instance = CacheInstanceConfig::new("default", "127.0.0.1", 1, vec![0, 1]);
        instance.dial_timeout_secs = 1;
        assert!(CacheRegistry::connect(&[instance]).await.is_err());
    }

    #[tokio::test]
    async fn connect_with_no_instances_is_empty() {
        let registry = CacheRegistry::connect(&[]).await.unwrap();
        assert!(registry.is_empty());
    }

    fn registry_keys(pairs: &[(&str, i64)]) -> Vec<CacheKey> {
        pairs.iter().map(|&(name, db)| CacheKey::new(name, db)).collect()
    }
}
