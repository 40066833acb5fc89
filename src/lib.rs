//! Request-routing API gateway library.

// Core subsystems
pub mod config;
pub mod http;
pub mod routing;

// Traffic management
pub mod load_balancer;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod store;

pub use config::schema::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
