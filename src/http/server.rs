//! HTTP/1.1 accept loop and connection draining.
//!
//! # Responsibilities
//! - Serve each accepted connection with hyper, bounding header read time
//!   and header size
//! - On shutdown, stop accepting and hand back a [`Drain`] for the
//!   in-flight connections

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{extract::ConnectInfo, http::Request, response::Response, Router};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::{
    rt::{TokioIo, TokioTimer},
    server::graceful::GracefulShutdown,
};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tower::ServiceExt;

use crate::config::ListenerConfig;
use crate::net::{ConnectionTracker, Listener, ListenerError};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("listener has no local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Per-connection protocol limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub read_timeout: Duration,
    pub max_header_bytes: usize,
}

impl ConnectionLimits {
    pub fn from_config(config: &ListenerConfig) -> Self {
        Self {
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            max_header_bytes: config.max_header_bytes,
        }
    }
}

/// How the listener drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every connection finished inside the grace period.
    Drained,
    /// The grace period ran out and the remaining connections were aborted.
    Forced { aborted: u64 },
}

/// In-flight connections left after the accept loop stopped.
pub struct Drain {
    graceful: GracefulShutdown,
    connections: JoinSet<()>,
    tracker: ConnectionTracker,
}

impl Drain {
    /// Ask every connection to finish its current request and close, aborting
    /// whatever is left at `grace`.
    pub async fn finish(mut self, grace: Duration) -> DrainOutcome {
        tracing::info!(
            connections = self.tracker.active_count(),
            grace_ms = grace.as_millis() as u64,
            "Draining connections"
        );

        let outcome = match tokio::time::timeout(grace, self.graceful.shutdown()).await {
            Ok(()) => DrainOutcome::Drained,
            Err(_) => {
                let aborted = self.tracker.active_count();
                self.connections.abort_all();
                tracing::warn!(aborted, "Grace period elapsed, aborting connections");
                DrainOutcome::Forced { aborted }
            }
        };
        while self.connections.join_next().await.is_some() {}
        outcome
    }
}

/// Hand-driven HTTP/1.1 server in front of an axum router.
pub struct HttpServer {
    listener: Listener,
    app: Router,
    limits: ConnectionLimits,
}

impl HttpServer {
    pub async fn bind(address: &str, config: &ListenerConfig, app: Router) -> Result<Self, ServerError> {
        let listener = Listener::bind(address, config.max_connections).await?;
        Ok(Self {
            listener,
            app,
            limits: ConnectionLimits::from_config(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Accept until `shutdown` fires, then close the socket and return the drain.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Drain {
        let graceful = GracefulShutdown::new();
        let tracker = ConnectionTracker::new();
        let mut connections = JoinSet::new();

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(self.limits.read_timeout)
            .max_buf_size(self.limits.max_header_bytes);

        tracing::debug!(max_connections = self.listener.max_connections(), "Accept loop started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Listener stopped accepting");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = tracker.track();
                        let app = self.app.clone();
                        let service = service_fn(move |request| dispatch(app.clone(), peer, request));
                        let connection = graceful.watch(builder.serve_connection(TokioIo::new(stream), service));
                        connections.spawn(async move {
                            let _permit = permit;
                            if let Err(e) = connection.await {
                                tracing::debug!(connection_id = %guard.id(), peer = %peer, error = %e, "Connection ended with error");
                            }
                            drop(guard);
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
            while connections.try_join_next().is_some() {}
        }

        drop(self.listener);
        Drain {
            graceful,
            connections,
            tracker,
        }
    }
}

/// Tag the request with its peer and hand it to the router.
async fn dispatch(app: Router, peer: SocketAddr, mut request: Request<Incoming>) -> Result<Response, Infallible> {
    request.extensions_mut().insert(ConnectInfo(peer));
    app.oneshot(request).await
}
