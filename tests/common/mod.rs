//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use gatehouse::cache::{CacheClient, CacheKey, CacheRegistry};
use gatehouse::config::{CacheInstanceConfig, ServiceConfig};
use gatehouse::http::{build_router_with, AppState, Drain, HttpServer, Pipeline};
use gatehouse::lifecycle::{shutdown::drain_and_close, Shutdown, ShutdownReport};

pub const ALLOWED_ORIGIN: &str = "https://a.example";
pub const OTHER_ORIGIN: &str = "https://b.example";
pub const CLIENT_ID: &str = "integration-client";

/// Loopback config on an ephemeral port with one allowed origin.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.cors.allow_origins = vec![ALLOWED_ORIGIN.to_string()];
    config.auth.client_id = CLIENT_ID.to_string();
    config.rate_limit.requests_per_second = 1000.0;
    config.rate_limit.burst = 1000;
    config
}

/// Registry of unprobed clients; nothing connects until a command runs.
pub fn lazy_registry(pairs: &[(&str, i64)]) -> Arc<CacheRegistry> {
    let registry = CacheRegistry::new();
    for &(name, database) in pairs {
        let config = CacheInstanceConfig::new(name, "127.0.0.1", 6379, vec![database]);
        let client = CacheClient::new(CacheKey::new(name, database), &config).unwrap();
        registry.register(client).unwrap();
    }
    Arc::new(registry)
}

/// Minimal in-process cache backend speaking the wire protocol.
///
/// Answers PING, reports every key missing, and acknowledges anything else.
pub async fn fake_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_backend(stream));
        }
    });
    addr
}

async fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let count: usize = line.trim().strip_prefix('*')?.parse().ok()?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let len: usize = line.trim().strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        args.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Some(args)
}

async fn serve_backend(stream: TcpStream) {
    let mut reader = BufReader::new(stream);
    while let Some(args) = read_command(&mut reader).await {
        let name = args.first().map(|a| a.to_ascii_uppercase()).unwrap_or_default();
        let reply = match (name.as_str(), args.get(1)) {
            ("PING", Some(echo)) => format!("${}\r\n{}\r\n", echo.len(), echo),
            ("PING", None) => "+PONG\r\n".to_string(),
            ("GET" | "HGET", _) => "$-1\r\n".to_string(),
            _ => "+OK\r\n".to_string(),
        };
        if reader.get_mut().write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Registry with one client per pair, all pointing at `backend`.
pub fn registry_at(backend: SocketAddr, pairs: &[(&str, i64)]) -> Arc<CacheRegistry> {
    let registry = CacheRegistry::new();
    for &(name, database) in pairs {
        let config = CacheInstanceConfig::new(name, backend.ip().to_string(), backend.port(), vec![database]);
        let client = CacheClient::new(CacheKey::new(name, database), &config).unwrap();
        registry.register(client).unwrap();
    }
    Arc::new(registry)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// A running listener with the production pipeline and extra routes.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<CacheRegistry>,
    shutdown: Shutdown,
    accept_loop: JoinHandle<Drain>,
}

impl TestServer {
    pub async fn start(config: ServiceConfig, registry: Arc<CacheRegistry>, open: Router<AppState>) -> Self {
        let pipeline = Pipeline::from_config(&config).unwrap();
        let app = build_router_with(AppState::new(registry.clone()), &pipeline, open, Router::new());
        let server = HttpServer::bind(&config.bind_address(), &config.listener, app).await.unwrap();
        let addr = server.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let accept_loop = tokio::spawn(server.run(shutdown.subscribe()));
        Self {
            addr,
            registry,
            shutdown,
            accept_loop,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Same shutdown path the service uses on a signal.
    pub async fn stop(self, grace: Duration) -> ShutdownReport {
        self.shutdown.trigger();
        drain_and_close(self.accept_loop, self.registry, grace).await
    }
}

pub async fn envelope(response: reqwest::Response) -> serde_json::Value {
    response.json().await.unwrap()
}
