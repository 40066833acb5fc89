//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing services)
//! - Validate value ranges (timeouts > 0, ratios in range)
//! - Reject backend addresses that cannot be forwarded to
//!
//! Returns all validation errors, not just the first.

use std::collections::HashSet;
use url::Url;

use crate::config::schema::{GatewayConfig, StoreKind};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),
    #[error("service '{service}' has invalid endpoint '{endpoint}': {reason}")]
    Endpoint {
        service: String,
        endpoint: String,
        reason: String,
    },
    #[error("service '{0}' has no endpoints")]
    NoEndpoints(String),
    #[error("service '{0}' is defined more than once")]
    DuplicateService(String),
    #[error("route '{route}' references unknown service '{service}'")]
    UnknownService { route: String, service: String },
    #[error("route '{route}' has invalid path prefix '{prefix}'")]
    PathPrefix { route: String, prefix: String },
    #[error("path prefix '{0}' is used by more than one route")]
    DuplicatePrefix(String),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("timeouts.request_secs ({request}) must be greater than timeouts.upstream_secs ({upstream})")]
    RequestTimeout { request: u64, upstream: u64 },
    #[error("circuit_breaker.failure_ratio must be in (0, 1], got {0}")]
    FailureRatio(f64),
    #[error("auth.secret must not be empty when a route requires authentication")]
    EmptySecret,
    #[error("invalid redis url '{0}'")]
    RedisUrl(String),
}

/// Parse a backend address, accepting only absolute `http` URLs with a host.
pub fn parse_endpoint(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.scheme() != "http" {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err("query and fragment are not allowed".to_string());
    }
    Ok(url)
}

/// Validate a configuration. Pure: no I/O.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config
        .listener
        .bind_address
        .parse::<std::net::SocketAddr>()
        .is_err()
    {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let mut names = HashSet::new();
    for service in &config.services {
        if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if service.endpoints.is_empty() {
            errors.push(ValidationError::NoEndpoints(service.name.clone()));
        }
        for endpoint in &service.endpoints {
            if let Err(reason) = parse_endpoint(endpoint) {
                errors.push(ValidationError::Endpoint {
                    service: service.name.clone(),
                    endpoint: endpoint.clone(),
                    reason,
                });
            }
        }
    }

    let mut prefixes = HashSet::new();
    for route in &config.routes {
        if !names.contains(route.service.as_str()) {
            errors.push(ValidationError::UnknownService {
                route: route.name.clone(),
                service: route.service.clone(),
            });
        }
        let prefix = route.path_prefix.trim_end_matches('/');
        if !route.path_prefix.starts_with('/') || prefix.is_empty() || prefix == "/health" {
            errors.push(ValidationError::PathPrefix {
                route: route.name.clone(),
                prefix: route.path_prefix.clone(),
            });
        } else if !prefixes.insert(prefix) {
            errors.push(ValidationError::DuplicatePrefix(prefix.to_string()));
        }
    }

    for (field, value) in [
        ("rate_limit.limit", config.rate_limit.limit),
        ("rate_limit.window_secs", config.rate_limit.window_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.upstream_secs", config.timeouts.upstream_secs),
        ("store.op_timeout_ms", config.store.op_timeout_ms),
        (
            "circuit_breaker.min_requests",
            config.circuit_breaker.min_requests as u64,
        ),
        (
            "circuit_breaker.open_timeout_secs",
            config.circuit_breaker.open_timeout_secs,
        ),
        (
            "circuit_breaker.half_open_max_requests",
            config.circuit_breaker.half_open_max_requests as u64,
        ),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    let timeouts = &config.timeouts;
    if timeouts.upstream_secs > 0 && timeouts.request_secs <= timeouts.upstream_secs {
        errors.push(ValidationError::RequestTimeout {
            request: timeouts.request_secs,
            upstream: timeouts.upstream_secs,
        });
    }

    let ratio = config.circuit_breaker.failure_ratio;
    if !(ratio > 0.0 && ratio <= 1.0) {
        errors.push(ValidationError::FailureRatio(ratio));
    }

    if config.requires_auth() && config.auth.secret.is_empty() {
        errors.push(ValidationError::EmptySecret);
    }

    if config.store.kind == StoreKind::Redis
        && config.requires_rate_limit()
        && redis::Client::open(config.store.redis_url.as_str()).is_err()
    {
        errors.push(ValidationError::RedisUrl(config.store.redis_url.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
