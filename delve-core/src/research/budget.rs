//! Session-wide token budget.
//!
//! One `BudgetTracker` is created per research session and shared by every
//! branch of the tree. Usage only ever grows; `exhausted` is a one-way latch
//! consulted before dispatching new branches.

use crate::types::TokenUsage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

/// Point-in-time view of a budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap: Option<u64>,
    pub used: u64,
    pub exhausted: bool,
}

#[derive(Debug, Default)]
pub struct BudgetTracker {
    cap: Option<u64>,
    used: AtomicU64,
    exhausted: AtomicBool,
}

impl BudgetTracker {
    /// Create a tracker. A cap of zero means no cap.
    pub fn new(cap: Option<u64>) -> Self {
        Self {
            cap: cap.filter(|c| *c > 0),
            used: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn cap(&self) -> Option<u64> {
        self.cap
    }

    /// Add the total of `usage` and latch exhaustion once the cap is reached.
    ///
    /// Without a cap usage is still counted but never exhausts.
    pub fn record(&self, usage: &TokenUsage) {
        self.record_units(usage.total() as u64);
    }

    pub fn record_units(&self, units: u64) {
        if units == 0 {
            return;
        }
        let previous = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_add(units))
            })
            .unwrap_or_else(|current| current);
        let used = previous.saturating_add(units);

        if let Some(cap) = self.cap
            && used >= cap
            && !self.exhausted.swap(true, Ordering::AcqRel)
        {
            info!(used, cap, "Token budget reached; no further branches will be dispatched");
        }
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            cap: self.cap,
            used: self.used(),
            exhausted: self.is_exhausted(),
        }
    }
}
