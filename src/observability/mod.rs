//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request:
//!     → tracing.rs (trace id, `request` span, x-request-id header)
//!     → access_log.rs (one record per completed request)
//!
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//! ```
//!
//! # Design Decisions
//! - Trace id flows through every log line via the request span
//! - Metrics are no-ops until a recorder is installed

pub mod access_log;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use access_log::{AccessLogger, AccessRecord};
pub use self::tracing::TraceContext;
