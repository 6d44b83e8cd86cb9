//! Global token-bucket admission gate.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};

use crate::config::RateLimitConfig;
use crate::http::middleware::{Next, Stage};
use crate::http::request::client_ip;
use crate::http::response::{code, reject};
use crate::observability::metrics;

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        // Callers read the clock before taking the lock, so `now` may lag.
        if now > self.last_update {
            let elapsed = now.duration_since(self.last_update).as_secs_f64();
            self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
            self.last_update = now;
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        self.refill(capacity, refill_rate, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// One bucket shared by every request in the process.
///
/// Starts full; tokens never exceed `capacity` and never go negative.
#[derive(Debug)]
pub struct RateGate {
    bucket: Mutex<TokenBucket>,
    capacity: f64,
    refill_rate: f64,
}

impl RateGate {
    /// Gate refilling `refill_rate` tokens per second up to `capacity`.
    pub fn new(refill_rate: f64, capacity: u32) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            bucket: Mutex::new(TokenBucket::new(capacity, Instant::now())),
            capacity,
            refill_rate: refill_rate.max(0.0),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst)
    }

    /// Try to take one token now.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, now: Instant) -> bool {
        // Bucket arithmetic cannot leave the state half-updated.
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_acquire(self.capacity, self.refill_rate, now)
    }

    /// Tokens currently available, after refilling.
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill(self.capacity, self.refill_rate, Instant::now());
        bucket.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

#[async_trait]
impl Stage for RateGate {
    fn name(&self) -> &'static str {
        "rate_gate"
    }

    async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        if self.try_acquire() {
            return next.run(request).await;
        }

        tracing::warn!(
            client_ip = %client_ip(&request),
            path = %request.uri().path(),
            "Request rejected by rate gate"
        );
        metrics::record_rate_limited();
        reject(
            StatusCode::TOO_MANY_REQUESTS,
            code::TOO_MANY_REQUESTS,
            "service busy, please retry later",
        )
    }
}
