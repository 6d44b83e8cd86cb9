//! Fault boundary around the rest of the chain.
//!
//! A panic below the guard never reaches the connection task. It is caught,
//! classified, logged with the request dump, and turned into an envelope
//! response.
//!
//! # Classification
//! - Client abort (broken pipe, connection reset): 200 with a "please retry"
//!   envelope, logged without a stack
//! - Anything else: 500 envelope, logged with the service's own stack frames
//!
//! Stacks are captured by a process-wide panic hook ([`install_panic_hook`])
//! that only acts while a guarded future is being polled on the current thread.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Once;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;

use crate::http::error::ErrorDetail;
use crate::http::middleware::{Next, Stage};
use crate::http::request::RequestDump;
use crate::http::response::{code, reject, ApiResponse};
use crate::observability::metrics;

const OWN_FRAMES: &str = concat!(env!("CARGO_CRATE_NAME"), "::");

pub const CLIENT_ABORT_MSG: &str = "an error occurred, please retry";
pub const INTERNAL_FAULT_MSG: &str = "server is busy, please retry later";

thread_local! {
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Install the stack-capturing panic hook. Idempotent.
///
/// Panics outside a guarded poll still go to the previously installed hook.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if GUARD_DEPTH.with(Cell::get) > 0 {
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            } else {
                previous(info);
            }
        }));
    });
}

struct GuardScope;

impl GuardScope {
    fn enter() -> Self {
        GUARD_DEPTH.with(|depth| depth.set(depth.get() + 1));
        GuardScope
    }
}

impl Drop for GuardScope {
    fn drop(&mut self) {
        GUARD_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// What kind of fault a recovered panic represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The peer went away mid-response; expected, not a bug.
    ClientAbort,
    Internal,
}

impl FaultKind {
    fn label(self) -> &'static str {
        match self {
            FaultKind::ClientAbort => "client_abort",
            FaultKind::Internal => "internal",
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<io::Error>() {
        e.to_string()
    } else {
        "non-string panic payload".to_string()
    }
}

pub fn classify(payload: &(dyn Any + Send)) -> FaultKind {
    if let Some(e) = payload.downcast_ref::<io::Error>() {
        return match e.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                FaultKind::ClientAbort
            }
            _ => FaultKind::Internal,
        };
    }

    let message = panic_message(payload).to_ascii_lowercase();
    if message.contains("broken pipe") || message.contains("connection reset by peer") {
        FaultKind::ClientAbort
    } else {
        FaultKind::Internal
    }
}

/// Keep only this crate's frames and their source locations.
pub fn filter_frames(backtrace: &str) -> String {
    let mut kept = Vec::new();
    let mut keep = false;
    for line in backtrace.lines() {
        if line.trim_start().starts_with("at ") {
            if keep {
                kept.push(line.trim());
            }
            continue;
        }
        keep = line.contains(OWN_FRAMES);
        if keep {
            kept.push(line.trim());
        }
    }
    kept.join("\n")
}

/// Converts downstream panics into envelope responses.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicRecoveryGuard;

impl PanicRecoveryGuard {
    pub fn new() -> Self {
        install_panic_hook();
        PanicRecoveryGuard
    }

    fn recover(payload: Box<dyn Any + Send>, dump: &RequestDump) -> Response {
        let message = panic_message(payload.as_ref());
        let kind = classify(payload.as_ref());
        let stack = LAST_BACKTRACE.with(|slot| slot.borrow_mut().take());
        metrics::record_panic(kind.label());

        let mut response = match kind {
            FaultKind::ClientAbort => {
                tracing::error!(error = %message, request = %dump, "Client connection aborted");
                ApiResponse::<()>::new(code::ERROR, CLIENT_ABORT_MSG, None).into_response()
            }
            FaultKind::Internal => {
                let stack = stack
                    .map(|bt| filter_frames(&bt.to_string()))
                    .unwrap_or_default();
                tracing::error!(error = %message, request = %dump, stack = %stack, "Recovered from panic");
                reject(StatusCode::INTERNAL_SERVER_ERROR, code::ERROR, INTERNAL_FAULT_MSG)
            }
        };
        response.extensions_mut().insert(ErrorDetail(message));
        response
    }
}

#[async_trait]
impl Stage for PanicRecoveryGuard {
    fn name(&self) -> &'static str {
        "panic_recovery"
    }

    async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        let dump = RequestDump::capture(&request);
        let mut guarded = AssertUnwindSafe(next.run(request)).catch_unwind();
        let outcome = std::future::poll_fn(|cx| {
            let _scope = GuardScope::enter();
            guarded.poll_unpin(cx)
        })
        .await;

        match outcome {
            Ok(response) => response,
            Err(payload) => Self::recover(payload, &dump),
        }
    }
}
