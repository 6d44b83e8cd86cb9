//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request:
//!     → recovery.rs (fault boundary around the handler, panic → envelope)
//!     → deadline.rs (write timeout, expiry → 503 envelope)
//!
//! Cache command:
//!     → On transient failure: backoff.rs (exponential delay with jitter)
//! ```
//!
//! # Design Decisions
//! - No panic below the recovery guard may end the process
//! - Every backend call has a deadline; retries are bounded by config

pub mod backoff;
pub mod deadline;
pub mod recovery;

pub use backoff::Backoff;
pub use deadline::RequestDeadline;
pub use recovery::PanicRecoveryGuard;
