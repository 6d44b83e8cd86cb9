//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Unstarted → Initializing → Serving → ShuttingDown → Stopped
//!
//! Startup (startup.rs):
//!     Load config → Logging → Cache registry → Pipeline → Listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting
//!         → Drain connections ┐ concurrently, one grace period
//!         → Close caches      ┘
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup; any failure is fatal and the service never serves
//! - Shutdown latency is the slower of drain and cache close, not the sum
//! - A listener still draining at the deadline is aborted

pub mod shutdown;
pub mod signals;
pub mod startup;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::watch;

pub use shutdown::{Shutdown, ShutdownReport};
pub use startup::{ConfigSource, StartupError};

use startup::Services;

/// Service phase. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Unstarted,
    Initializing,
    Serving,
    ShuttingDown,
    Stopped,
}

/// Drives one service instance from start to stop.
#[derive(Debug)]
pub struct Lifecycle {
    phase: watch::Sender<Phase>,
    local_addr: OnceLock<SocketAddr>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(Phase::Unstarted);
        Self {
            phase,
            local_addr: OnceLock::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Address the listener is bound to, once serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Wait until the phase reaches at least `target`; returns the phase seen.
    pub async fn reached(&self, target: Phase) -> Phase {
        let mut rx = self.subscribe();
        let seen = rx.wait_for(|phase| *phase >= target).await.map(|phase| *phase);
        seen.unwrap_or_else(|_| self.phase())
    }

    fn advance(&self, next: Phase) {
        let previous = self.phase.send_replace(next);
        tracing::info!(from = ?previous, to = ?next, "Lifecycle transition");
    }

    /// Start the service, serve until `signal` resolves, then shut down.
    ///
    /// A startup failure ends in `Stopped` without ever serving.
    pub async fn run<F>(&self, source: ConfigSource, signal: F) -> Result<ShutdownReport, StartupError>
    where
        F: Future<Output = ()>,
    {
        if self.phase() != Phase::Unstarted {
            return Err(StartupError::AlreadyStarted);
        }
        self.advance(Phase::Initializing);

        let Services {
            config,
            registry,
            server,
        } = match startup::initialize(source).await {
            Ok(services) => services,
            Err(e) => {
                tracing::error!(error = %e, "Startup failed");
                self.advance(Phase::Stopped);
                return Err(e);
            }
        };

        let addr = match server.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                registry.close_all(Duration::from_secs(1)).await;
                self.advance(Phase::Stopped);
                return Err(e.into());
            }
        };
        let _ = self.local_addr.set(addr);

        let shutdown = Shutdown::new();
        let accept_loop = tokio::spawn(server.run(shutdown.subscribe()));
        self.advance(Phase::Serving);
        tracing::info!(address = %addr, "Accepting connections");

        signal.await;

        self.advance(Phase::ShuttingDown);
        shutdown.trigger();
        let grace = Duration::from_secs(config.listener.shutdown_grace_secs);
        let report = shutdown::drain_and_close(accept_loop, registry, grace).await;

        self.advance(Phase::Stopped);
        Ok(report)
    }
}
