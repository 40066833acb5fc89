//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client fixed window, fail-open on store outage)
//!     → auth.rs (bearer token verification on protected routes)
//!     → Pass to the forwarder
//! ```
//!
//! # Design Decisions
//! - Rejections are answered by the gateway and never forwarded
//! - Availability over exact enforcement for rate limiting
//! - Fail closed for authentication: any verification doubt rejects

pub mod auth;
pub mod rate_limit;

pub use auth::{AuthContext, AuthError, Authenticator};
pub use rate_limit::RateLimiter;
