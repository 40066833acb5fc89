//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: defaults, then the optional TOML file, then the
/// process environment, then validation.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => GatewayConfig::default(),
    };

    let config = apply_env_overrides(config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply the deployment's environment variables on top of `config`.
///
/// `lookup` resolves a variable name; empty values count as unset.
pub fn apply_env_overrides<F>(mut config: GatewayConfig, lookup: F) -> Result<GatewayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(port) = get("PORT") {
        let port: u16 = port.trim().parse().map_err(|_| ConfigError::Env {
            var: "PORT",
            reason: format!("'{}' is not a port number", port),
        })?;
        config.listener.bind_address = format!("0.0.0.0:{}", port);
    }

    for service in &mut config.services {
        let Some(var) = service.env.as_deref() else {
            continue;
        };
        if let Some(value) = get(var) {
            service.endpoints = split_list(&value);
        }
    }

    if let Some(addr) = get("REDIS_ADDR") {
        config.store.redis_url = if addr.contains("://") {
            addr
        } else {
            format!("redis://{}/0", addr.trim())
        };
    }

    if let Some(secret) = get("JWT_SECRET") {
        config.auth.secret = secret;
    }

    if let Some(origins) = get("CORS_ALLOWED_ORIGINS") {
        config.cors.allowed_origins = split_list(&origins);
    }

    if let Some(limit) = get("RATE_LIMIT_REQUESTS") {
        config.rate_limit.limit = limit.trim().parse().map_err(|_| ConfigError::Env {
            var: "RATE_LIMIT_REQUESTS",
            reason: format!("'{}' is not a number", limit),
        })?;
    }

    if let Some(window) = get("RATE_LIMIT_WINDOW_SECS") {
        config.rate_limit.window_secs = window.trim().parse().map_err(|_| ConfigError::Env {
            var: "RATE_LIMIT_WINDOW_SECS",
            reason: format!("'{}' is not a number", window),
        })?;
    }

    if let Some(level) = get("LOG_LEVEL") {
        config.observability.log_level = level;
    }

    Ok(config)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
