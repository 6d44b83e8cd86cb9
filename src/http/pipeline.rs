//! Stage composition and the route table.
//!
//! ```text
//! trace_context → origin_guard → rate_gate → access_logger → panic_recovery
//!     → request_deadline
//!     → /health
//!     → /api/* → auth_guard → handler
//!     → /api fallback (404 envelope, after auth_guard)
//!     → fallback (404 envelope)
//!
//! A known path with an unsupported method answers with a 405 envelope.
//! ```

use std::sync::Arc;

use axum::{
    http::header::InvalidHeaderValue,
    routing::{get, post},
    Router,
};

use crate::config::ServiceConfig;
use crate::http::handlers::{get_record, health, method_not_allowed, not_found, save_record, AppState};
use crate::http::middleware::{Stage, StageLayer};
use crate::observability::{AccessLogger, TraceContext};
use crate::resilience::{PanicRecoveryGuard, RequestDeadline};
use crate::security::{access_control::InvalidAuthHeader, AuthGuard, OriginGuard, RateGate};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid CORS header value: {0}")]
    Cors(#[from] InvalidHeaderValue),

    #[error(transparent)]
    Auth(#[from] InvalidAuthHeader),
}

/// Stage lists for every route and for the protected group.
#[derive(Debug, Clone)]
pub struct Pipeline {
    global: StageLayer,
    protected: StageLayer,
}

impl Pipeline {
    pub fn new(global: Vec<Arc<dyn Stage>>, protected: Vec<Arc<dyn Stage>>) -> Self {
        Self {
            global: StageLayer::new(global),
            protected: StageLayer::new(protected),
        }
    }

    /// The fixed production order, built from config.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, PipelineError> {
        let global: Vec<Arc<dyn Stage>> = vec![
            Arc::new(TraceContext),
            Arc::new(OriginGuard::new(&config.cors, config.debug)?),
            Arc::new(RateGate::from_config(&config.rate_limit)),
            Arc::new(AccessLogger),
            Arc::new(PanicRecoveryGuard::new()),
            Arc::new(RequestDeadline::from_config(&config.listener)),
        ];
        let protected: Vec<Arc<dyn Stage>> = vec![Arc::new(AuthGuard::new(&config.auth)?)];

        let pipeline = Self::new(global, protected);
        tracing::info!(
            global = ?pipeline.global.names(),
            protected = ?pipeline.protected.names(),
            "Pipeline built"
        );
        Ok(pipeline)
    }

    pub fn global(&self) -> &StageLayer {
        &self.global
    }

    pub fn protected(&self) -> &StageLayer {
        &self.protected
    }
}

/// Routes with the protected group nested under `/api`.
pub fn build_router(state: AppState, pipeline: &Pipeline) -> Router {
    build_router_with(state, pipeline, Router::new(), Router::new())
}

/// Like [`build_router`], merging extra open and protected routes.
///
/// Extra protected routes are nested under `/api` with the auth stages.
pub fn build_router_with(
    state: AppState,
    pipeline: &Pipeline,
    open: Router<AppState>,
    protected: Router<AppState>,
) -> Router {
    let api = Router::new()
        .route("/records", post(save_record).get(get_record))
        .merge(protected)
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(not_found)
        .layer(pipeline.protected.clone());

    Router::new()
        .route("/health", get(health))
        .merge(open)
        .method_not_allowed_fallback(method_not_allowed)
        .nest("/api", api)
        .fallback(not_found)
        .with_state(state)
        .layer(pipeline.global.clone())
}
