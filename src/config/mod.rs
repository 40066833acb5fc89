//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! built-in defaults
//!     → optional TOML file (loader.rs)
//!     → environment overrides (loader.rs)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → consumed once at startup to build the pipelines
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, CircuitBreakerConfig, CorsConfig, GatewayConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, PolicyKind, RateLimitConfig, RouteConfig, ServiceConfig, StoreConfig,
    StoreKind, TimeoutConfig,
};
