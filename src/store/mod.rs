//! Shared counter store subsystem.
//!
//! # Data Flow
//! ```text
//! RateLimiter::allow(client)
//!     → CounterStore::increment("<prefix>:<client>", window)
//!         - redis.rs  (INCR + EXPIRE-if-new in one Lua script)
//!         - memory.rs (in-process fixed windows)
//!     → count within the current window
//! ```
//!
//! # Design Decisions
//! - Increment-and-expire is a single atomic operation from the store's view
//! - The window starts at the first increment after expiry
//! - Store failures are returned, never hidden; callers choose the policy

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::time::Duration;

pub use self::memory::MemoryCounterStore;
pub use self::redis::RedisCounterStore;

/// Failure to reach or use the shared counter store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(#[from] ::redis::RedisError),
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
}

/// Key/value store with per-key expiry and atomic increment.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter at `key` and return the new count.
    ///
    /// When the key is absent or expired it is created with count 1 and an
    /// expiry of `window` from now; an existing key keeps its deadline.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
