//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Keep the request deadline above the origin fetch deadline
//! - Check header-bound strings are valid header values
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::HeaderValue;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid {field} address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("timeouts.request_secs ({request_secs}) must exceed upstream.fetch_timeout_secs ({fetch_secs})")]
    RequestTimeoutNotAboveFetch { request_secs: u64, fetch_secs: u64 },

    #[error("cache.dir must not be empty")]
    EmptyCacheDir,

    #[error("{field} is not a valid header value: '{value}'")]
    InvalidHeaderValue { field: &'static str, value: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("upstream.connect_timeout_secs"));
    }
    if config.upstream.fetch_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("upstream.fetch_timeout_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("timeouts.request_secs"));
    }
    // A slow origin must reach the fallback before the request deadline fires.
    if config.timeouts.request_secs > 0
        && config.upstream.fetch_timeout_secs > 0
        && config.timeouts.request_secs <= config.upstream.fetch_timeout_secs
    {
        errors.push(ValidationError::RequestTimeoutNotAboveFetch {
            request_secs: config.timeouts.request_secs,
            fetch_secs: config.upstream.fetch_timeout_secs,
        });
    }

    if config.cache.dir.as_os_str().is_empty() {
        errors.push(ValidationError::EmptyCacheDir);
    }

    let header_fields = [
        ("cache.hit_cache_control", &config.cache.hit_cache_control),
        ("fallback.content_type", &config.fallback.content_type),
        ("fallback.cache_control", &config.fallback.cache_control),
        ("upstream.user_agent", &config.upstream.user_agent),
    ];
    for (field, value) in header_fields {
        if HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::InvalidHeaderValue {
                field,
                value: value.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
