//! In-process counter store for single-node deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::store::{CounterStore, StoreError};

/// Expired windows are swept after this many increments.
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: Instant,
}

/// Fixed-window counters held in a sharded map.
///
/// Each increment holds only the shard lock for its key, so unrelated
/// clients do not contend.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    windows: DashMap<String, Window>,
    ops: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every window whose deadline has passed.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.windows.retain(|_, w| w.expires_at > now);
    }

    /// Number of live (possibly expired, not yet swept) windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let count = {
            let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
                count: 0,
                expires_at: now + window,
            });
            if entry.expires_at <= now {
                *entry = Window {
                    count: 0,
                    expires_at: now + window,
                };
            }
            entry.count += 1;
            entry.count
        };

        if self.ops.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep_expired();
        }

        Ok(count)
    }
}
