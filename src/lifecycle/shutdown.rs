//! Shutdown coordination.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::cache::{CacheRegistry, CloseReport};
use crate::http::{Drain, DrainOutcome};

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub listener: DrainOutcome,
    pub cache: CloseReport,
    pub elapsed: Duration,
}

/// Wait for the accept loop to stop, then drain connections and close the
/// cache registry side by side, both bounded by `grace`.
pub async fn drain_and_close(
    accept_loop: JoinHandle<Drain>,
    registry: Arc<CacheRegistry>,
    grace: Duration,
) -> ShutdownReport {
    let started = Instant::now();

    let (listener, cache) = match accept_loop.await {
        Ok(drain) => tokio::join!(drain.finish(grace), registry.close_all(grace)),
        Err(e) => {
            tracing::error!(error = %e, "Accept loop ended abnormally");
            (DrainOutcome::Forced { aborted: 0 }, registry.close_all(grace).await)
        }
    };

    let report = ShutdownReport {
        listener,
        cache,
        elapsed: started.elapsed(),
    };
    match report.listener {
        DrainOutcome::Drained => tracing::info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            caches_closed = report.cache.closed.len(),
            "Shutdown complete"
        ),
        DrainOutcome::Forced { aborted } => tracing::warn!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            aborted,
            caches_closed = report.cache.closed.len(),
            "Shutdown forced at grace deadline"
        ),
    }
    report
}
