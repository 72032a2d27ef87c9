// 11.0: liveness and status views for the service edge. read-only.

use crate::engine::CountersSnapshot;
use crate::kill_switch::KillSwitchRecord;
use crate::risk::RiskState;
use crate::types::{Quote, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    /// Running, but the daily circuit breaker has tripped.
    Degraded,
    /// Kill switch is active.
    Halted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_secs: Decimal,
    pub kill_switch_active: bool,
    pub state_version: u64,
    pub checked_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub health: HealthStatus,
    pub kill_switch: KillSwitchRecord,
    pub equity: Quote,
    pub daily_pnl: Quote,
    pub exposure_pct: Decimal,
    pub open_positions: usize,
    pub pending_orders: u32,
    pub state: RiskState,
    pub counters: CountersSnapshot,
}

impl StatusReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}
