//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → router.rs (longest matching prefix)
//!     → matcher.rs (segment-aware prefix test)
//!     → pipeline.rs (route's ordered stages)
//!     → stages.rs (rate limit → breaker → authenticate, per route config)
//!     → Forwarder (terminal)
//!
//! Route Composition (at startup):
//!     RouteConfig[]
//!     → One pipeline per route, stages in configured order
//!     → Sort by prefix length
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod pipeline;
pub mod router;
pub mod stages;

pub use pipeline::{Next, Pipeline, Stage, Terminal};
pub use router::{Policies, RouteTable};
