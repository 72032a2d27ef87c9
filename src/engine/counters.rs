// 8.4 engine/counters.rs: monotonic operational counters, read without locks.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RiskCounters {
    signals_received: AtomicU64,
    signals_approved: AtomicU64,
    signals_rejected: AtomicU64,
    signals_halted: AtomicU64,
    trade_results: AtomicU64,
    execution_failures: AtomicU64,
    inconsistency_total: AtomicU64,
    recovery_total: AtomicU64,
    resync_total: AtomicU64,
    kill_switch_activations: AtomicU64,
}

/// Point-in-time copy of [`RiskCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub signals_received: u64,
    pub signals_approved: u64,
    pub signals_rejected: u64,
    pub signals_halted: u64,
    pub trade_results: u64,
    pub execution_failures: u64,
    pub inconsistency_total: u64,
    pub recovery_total: u64,
    pub resync_total: u64,
    pub kill_switch_activations: u64,
}

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

impl RiskCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_received(&self) -> u64 {
        bump(&self.signals_received)
    }

    pub fn signal_approved(&self) -> u64 {
        bump(&self.signals_approved)
    }

    pub fn signal_rejected(&self) -> u64 {
        bump(&self.signals_rejected)
    }

    pub fn signal_halted(&self) -> u64 {
        bump(&self.signals_halted)
    }

    pub fn trade_result(&self) -> u64 {
        bump(&self.trade_results)
    }

    pub fn execution_failure(&self) -> u64 {
        bump(&self.execution_failures)
    }

    pub fn inconsistency(&self) -> u64 {
        bump(&self.inconsistency_total)
    }

    pub fn recovery(&self) -> u64 {
        bump(&self.recovery_total)
    }

    pub fn resync(&self) -> u64 {
        bump(&self.resync_total)
    }

    pub fn kill_switch_activation(&self) -> u64 {
        bump(&self.kill_switch_activations)
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            signals_received: load(&self.signals_received),
            signals_approved: load(&self.signals_approved),
            signals_rejected: load(&self.signals_rejected),
            signals_halted: load(&self.signals_halted),
            trade_results: load(&self.trade_results),
            execution_failures: load(&self.execution_failures),
            inconsistency_total: load(&self.inconsistency_total),
            recovery_total: load(&self.recovery_total),
            resync_total: load(&self.resync_total),
            kill_switch_activations: load(&self.kill_switch_activations),
        }
    }
}
