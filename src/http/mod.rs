//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1, header limits, connection draining)
//!     → pipeline.rs (global stages, route table, protected group)
//!     → middleware/ (stage chain driver)
//!     → handlers.rs (business routes)
//!     → response.rs (uniform envelope)
//!     → Send to client
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;

pub use error::{AppError, ErrorDetail};
pub use handlers::AppState;
pub use middleware::{Next, Stage, StageLayer};
pub use pipeline::{build_router, build_router_with, Pipeline, PipelineError};
pub use request::{RequestContext, RequestContextExt, TraceId, X_REQUEST_ID};
pub use response::ApiResponse;
pub use server::{ConnectionLimits, Drain, DrainOutcome, HttpServer, ServerError};
