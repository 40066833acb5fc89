//! Round-robin selection cursor.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin cursor.
/// Always holds a valid index for the endpoint list it was created for.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current index and advance the cursor modulo `len`.
    ///
    /// Returns `None` when there is nothing to select from.
    pub fn next_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }

        let prev = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c);
        Some(prev % len)
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }
}
