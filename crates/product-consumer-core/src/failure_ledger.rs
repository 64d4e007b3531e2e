//! # Failure Ledger
//!
//! Consecutive failure counts per product, shared by every worker.
//!
//! All reads and writes go through a single mutex. The lock is only held for
//! the read-modify-write of one entry; callers must never keep it across an
//! `.await`, which the API enforces by never handing out the guard.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Shared, lock-guarded failure counter keyed by product code
#[derive(Debug, Default)]
pub struct FailureLedger {
    counts: Mutex<HashMap<String, u32>>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn counts(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one more failure for `key` and return the new consecutive count
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut counts = self.counts();
        let count = counts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Forget the failures recorded for `key`
    pub fn reset(&self, key: &str) {
        self.counts().remove(key);
    }

    /// Current consecutive failure count for `key`
    pub fn failures(&self, key: &str) -> u32 {
        self.counts().get(key).copied().unwrap_or(0)
    }

    /// Number of keys with at least one recorded failure
    pub fn tracked(&self) -> usize {
        self.counts().len()
    }
}

#[cfg(test)]
#[path = "failure_ledger_tests.rs"]
mod tests;
