//! Memory ceiling shared by the buffering operators of one execution tree
//!
//! Operators charge the bytes they hold under their own component name and
//! release them as rows leave. A charge that would cross the ceiling fails
//! and leaves the ledger unchanged.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

/// Snapshot of a [`MemoryBudget`] ledger
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    /// Bytes held right now
    pub in_use: usize,
    /// Highest value `in_use` reached
    pub peak_usage: usize,
    /// Sum of every successful charge
    pub total_charged: usize,
    /// Bytes held right now, per component
    pub component_usage: HashMap<String, usize>,
}

/// Byte ceiling with per-component accounting
#[derive(Debug)]
pub struct MemoryBudget {
    ceiling: usize,
    ledger: Mutex<MemoryStats>,
}

impl MemoryBudget {
    /// Budget allowing at most `ceiling` bytes held at once
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            ledger: Mutex::new(MemoryStats::default()),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, MemoryStats> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Charge `bytes` to `component`
    pub fn charge(&self, component: &str, bytes: usize) -> Result<()> {
        let mut ledger = self.ledger();
        let wanted = ledger.in_use.saturating_add(bytes);
        if wanted > self.ceiling {
            return Err(Error::MemoryBudgetExceeded {
                requested: bytes,
                available: self.ceiling - ledger.in_use,
            });
        }
        ledger.in_use = wanted;
        ledger.peak_usage = ledger.peak_usage.max(wanted);
        ledger.total_charged += bytes;
        *ledger.component_usage.entry(component.to_string()).or_default() += bytes;
        Ok(())
    }

    /// Return up to `bytes` previously charged to `component`
    pub fn release(&self, component: &str, bytes: usize) {
        let mut ledger = self.ledger();
        let held = ledger.component_usage.get(component).copied().unwrap_or(0);
        let bytes = bytes.min(held);
        ledger.component_usage.insert(component.to_string(), held - bytes);
        ledger.in_use -= bytes;
    }

    /// Copy of the current ledger
    pub fn stats(&self) -> MemoryStats {
        self.ledger().clone()
    }
}
