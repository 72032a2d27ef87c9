// 8.3 engine/store.rs: durable snapshot + live-state cache contracts and in-memory impls.
// the durable store is the source of truth; the cache only survives restarts with no history yet.

use crate::risk::{OpenPosition, RiskState};
use crate::sizing::TradeStats;
use crate::types::{Price, Quote, Side, SignedSize, Timestamp};
use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPosition {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub mark_price: Option<Decimal>,
}

/// Latest portfolio snapshot as the durable store reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub total_equity: Decimal,
    pub total_exposure_pct: Decimal,
    pub daily_pnl: Decimal,
    #[serde(default)]
    pub open_positions: Vec<SnapshotPosition>,
    #[serde(default)]
    pub trade_stats: Option<TradeStats>,
    #[serde(default)]
    pub taken_at: Option<Timestamp>,
}

impl PortfolioSnapshot {
    pub fn new(total_equity: Decimal, total_exposure_pct: Decimal, daily_pnl: Decimal) -> Self {
        Self {
            total_equity,
            total_exposure_pct,
            daily_pnl,
            open_positions: Vec::new(),
            trade_stats: None,
            taken_at: None,
        }
    }

    pub fn expected_exposure(&self) -> Quote {
        Quote::new(self.total_equity * self.total_exposure_pct)
    }

    // 8.3.1: the full replacement ledger. stats and pending orders aren't in the
    // durable record, so they come from `previous` when the snapshot lacks them
    pub fn to_risk_state(&self, previous: Option<&RiskState>, now: Timestamp) -> RiskState {
        let mut positions = BTreeMap::new();
        for p in &self.open_positions {
            let (Some(entry), true) = (Price::new(p.entry_price), p.quantity > Decimal::ZERO) else {
                tracing::warn!(symbol = %p.symbol, "skipping unusable snapshot position");
                continue;
            };
            let last = p.mark_price.and_then(Price::new).unwrap_or(entry);
            positions.insert(
                p.symbol.clone(),
                OpenPosition {
                    quantity: SignedSize::from_side(p.side, p.quantity),
                    entry_price: entry,
                    last_price: last,
                },
            );
        }

        RiskState {
            equity: Quote::new(self.total_equity),
            daily_realized_pnl: Quote::new(self.daily_pnl),
            daily_unrealized_pnl: Quote::zero(),
            total_exposure: self.expected_exposure(),
            positions,
            pending_orders: previous.map(|s| s.pending_orders).unwrap_or(0),
            stats: self.trade_stats.or_else(|| previous.and_then(|s| s.stats)),
            version: previous.map(|s| s.version).unwrap_or(0),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store read timed out after {0:?}")]
    Timeout(Duration),

    #[error("store returned corrupt data: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// None when there is no history yet.
    async fn latest_snapshot(&self) -> Result<Option<PortfolioSnapshot>, StoreError>;
}

#[async_trait]
pub trait StateCache: Send + Sync {
    async fn load(&self) -> Result<Option<RiskState>, StoreError>;
    async fn save(&self, state: &RiskState) -> Result<(), StoreError>;
}

/// Snapshot store backed by memory, with knobs to simulate outages and slow reads.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshot: RwLock<Option<PortfolioSnapshot>>,
    failing: AtomicBool,
    delay: RwLock<Option<Duration>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: PortfolioSnapshot) -> Self {
        let store = Self::default();
        store.set(snapshot);
        store
    }

    pub fn set(&self, snapshot: PortfolioSnapshot) {
        *self.snapshot.write() = Some(snapshot);
    }

    pub fn clear(&self) {
        *self.snapshot.write() = None;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn latest_snapshot(&self) -> Result<Option<PortfolioSnapshot>, StoreError> {
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(self.snapshot.read().clone())
    }
}

/// Keeps the newest version it has seen.
#[derive(Debug, Default)]
pub struct InMemoryStateCache {
    state: RwLock<Option<RiskState>>,
}

impl InMemoryStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peek(&self) -> Option<RiskState> {
        self.state.read().clone()
    }
}

#[async_trait]
impl StateCache for InMemoryStateCache {
    async fn load(&self) -> Result<Option<RiskState>, StoreError> {
        Ok(self.state.read().clone())
    }

    async fn save(&self, state: &RiskState) -> Result<(), StoreError> {
        let mut guard = self.state.write();
        let newer = guard.as_ref().map_or(true, |current| state.version >= current.version);
        if newer {
            *guard = Some(state.clone());
        }
        Ok(())
    }
}
