// 8.0.2: result types and errors for engine operations.

use super::store::StoreError;
use crate::config::ConfigError;
use crate::events::AlertEvent;
use crate::gate::RiskDecision;
use crate::kill_switch::{KillSwitchError, KillSwitchRecord};
use crate::types::{Quote, SignedSize};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What happened to one inbound signal.
#[derive(Debug, Clone)]
pub enum SignalOutcome {
    Approved(RiskDecision),
    Rejected(RiskDecision),
    /// Kill switch was active; the gate never ran.
    Halted(KillSwitchRecord),
}

impl SignalOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, SignalOutcome::Approved(_))
    }

    pub fn decision(&self) -> Option<&RiskDecision> {
        match self {
            SignalOutcome::Approved(d) | SignalOutcome::Rejected(d) => Some(d),
            SignalOutcome::Halted(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeOutcome {
    pub applied: bool,
    pub realized_pnl: Quote,
    pub remaining: Option<SignedSize>,
    pub alert: Option<AlertEvent>,
}

/// One reconciliation tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    InSync { drift: Decimal },
    Recovered { drift: Decimal },
    /// Store has no history yet; nothing to compare against.
    NoSnapshot,
    /// Store failed or timed out. Live state untouched.
    Skipped { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSource {
    DurableSnapshot,
    Cache,
    Defaults,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Kill switch error: {0}")]
    KillSwitch(#[from] KillSwitchError),

    #[error("Event loop closed: {0}")]
    ChannelClosed(&'static str),
}
