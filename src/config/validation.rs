//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check value ranges (rates > 0, timeouts > 0, pool sizing)
//! - Check cache instance keys are unique

use std::collections::HashSet;

use crate::config::schema::{ServiceConfig, PLACEHOLDER_CLIENT_ID};

/// Smallest header buffer hyper accepts.
const MIN_HEADER_BYTES: usize = 8192;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !(config.rate_limit.requests_per_second > 0.0) {
        errors.push(ValidationError::new("rate_limit.requests_per_second", "must be greater than 0"));
    }
    if config.rate_limit.burst == 0 {
        errors.push(ValidationError::new("rate_limit.burst", "must be at least 1"));
    }

    let listener = &config.listener;
    if listener.read_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.read_timeout_secs", "must be greater than 0"));
    }
    if listener.write_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.write_timeout_secs", "must be greater than 0"));
    }
    if listener.max_header_bytes < MIN_HEADER_BYTES {
        errors.push(ValidationError::new(
            "listener.max_header_bytes",
            format!("must be at least {MIN_HEADER_BYTES}"),
        ));
    }
    if listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be at least 1"));
    }

    if config.auth.header.trim().is_empty() {
        errors.push(ValidationError::new("auth.header", "must not be empty"));
    }
    if config.auth.client_id.is_empty() {
        errors.push(ValidationError::new("auth.client_id", "must not be empty"));
    } else if config.auth.client_id == PLACEHOLDER_CLIENT_ID {
        errors.push(ValidationError::new("auth.client_id", "placeholder value must be replaced"));
    }

    let mut seen = HashSet::new();
    for (i, instance) in config.cache.instances.iter().enumerate() {
        let prefix = format!("cache.instances[{i}]");
        if instance.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{prefix}.name"), "must not be empty"));
        }
        if instance.address.trim().is_empty() {
            errors.push(ValidationError::new(format!("{prefix}.address"), "must not be empty"));
        }
        if instance.databases.is_empty() {
            errors.push(ValidationError::new(format!("{prefix}.databases"), "must list at least one database"));
        }
        if instance.max_connections == 0 {
            errors.push(ValidationError::new(format!("{prefix}.max_connections"), "must be at least 1"));
        }
        if instance.min_idle > instance.max_connections {
            errors.push(ValidationError::new(
                format!("{prefix}.min_idle"),
                "must not exceed max_connections",
            ));
        }
        if instance.dial_timeout_secs == 0 || instance.read_timeout_secs == 0 || instance.write_timeout_secs == 0 {
            errors.push(ValidationError::new(format!("{prefix}"), "timeouts must be greater than 0"));
        }
        for db in &instance.databases {
            if *db < 0 {
                errors.push(ValidationError::new(format!("{prefix}.databases"), format!("invalid index {db}")));
            }
            if !seen.insert((instance.name.clone(), *db)) {
                errors.push(ValidationError::new(
                    format!("{prefix}.databases"),
                    format!("duplicate instance {}/{}", instance.name, db),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
