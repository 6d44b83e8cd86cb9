//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (origin allow-set, CORS response headers, preflight)
//!     → rate_limit.rs (single global token bucket)
//!     → ... logging / recovery ...
//!     → access_control.rs (static credential, protected groups only)
//!     → Pass to handler
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any policy check failure
//! - Rejections are ordinary terminal responses, never faults
//! - Policy objects are built once at startup and never mutated

pub mod access_control;
pub mod cors;
pub mod rate_limit;

pub use access_control::AuthGuard;
pub use cors::OriginGuard;
pub use rate_limit::RateGate;
