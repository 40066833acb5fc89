//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → circuit_breaker.rs (admit or fail fast)
//!     → forwarder call (bounded by the upstream timeout)
//!     → circuit_breaker.rs (record 5xx / transport error as failure)
//! ```
//!
//! # Design Decisions
//! - One breaker per backend service, created at startup
//! - No transparent retries: a failed call is reported, not replayed
//! - Breaker rejections surface as 503

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerError, BreakerSettings, BreakerState, CircuitBreaker, Counts};
