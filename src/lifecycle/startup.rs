//! Startup orchestration.
//!
//! # Order
//! 1. Configuration (file or in-memory), validated
//! 2. Logging, then the optional metrics exporter
//! 3. Cache registry: every declared backend probed, fail fast
//! 4. Pipeline stages (origin allow-set, rate gate, credential)
//! 5. Listener bound last, so traffic arrives only when everything is ready

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{CacheError, CacheRegistry};
use crate::config::{load_config, validate_config, ConfigError, ServiceConfig};
use crate::http::{build_router, AppState, HttpServer, Pipeline, PipelineError, ServerError};
use crate::observability::{logging, logging::LoggingError, metrics};

/// Where the configuration comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// TOML file; a non-zero port override replaces the file's port.
    File {
        path: PathBuf,
        port_override: Option<u16>,
    },
    /// Already-built configuration, validated like a file would be.
    Value(ServiceConfig),
}

/// Anything that stops the service from reaching `Serving`.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("logging: {0}")]
    Logging(#[from] LoggingError),

    #[error("cache: {0}")]
    Cache(#[from] CacheError),

    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("listener: {0}")]
    Server(#[from] ServerError),

    #[error("service was already started")]
    AlreadyStarted,
}

/// Everything built during startup, ready to serve.
pub struct Services {
    pub config: ServiceConfig,
    pub registry: Arc<CacheRegistry>,
    pub server: HttpServer,
}

pub fn load(source: ConfigSource) -> Result<ServiceConfig, ConfigError> {
    match source {
        ConfigSource::File { path, port_override } => load_config(&path, port_override),
        ConfigSource::Value(config) => {
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

fn start_metrics(config: &ServiceConfig) {
    if !config.metrics.enabled {
        return;
    }
    match config.metrics.address.parse::<SocketAddr>() {
        Ok(addr) => metrics::init_metrics(addr),
        Err(e) => tracing::error!(
            metrics_address = %config.metrics.address,
            error = %e,
            "Failed to parse metrics address"
        ),
    }
}

async fn serve(config: &ServiceConfig, registry: &Arc<CacheRegistry>) -> Result<HttpServer, StartupError> {
    let pipeline = Pipeline::from_config(config)?;
    let app = build_router(AppState::new(registry.clone()), &pipeline);
    Ok(HttpServer::bind(&config.bind_address(), &config.listener, app).await?)
}

pub async fn initialize(source: ConfigSource) -> Result<Services, StartupError> {
    let config = load(source)?;

    logging::init(&config.log)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.bind_address(),
        debug = config.debug,
        cache_instances = config.cache.instances.len(),
        "Configuration loaded"
    );
    start_metrics(&config);

    let registry = Arc::new(CacheRegistry::connect(&config.cache.instances).await?);
    tracing::info!(clients = ?registry.keys(), "Cache registry ready");

    match serve(&config, &registry).await {
        Ok(server) => Ok(Services {
            config,
            registry,
            server,
        }),
        Err(e) => {
            // Pools are already open; release them before failing.
            registry.close_all(std::time::Duration::from_secs(1)).await;
            Err(e)
        }
    }
}
