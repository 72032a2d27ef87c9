// 8.2 engine/reconcile.rs: keeps the live risk state honest against the durable store.
// sole writer of the live snapshot. store I/O never happens under the lock.

use super::counters::RiskCounters;
use super::results::{SeedSource, TickOutcome, TradeOutcome};
use super::store::{PortfolioSnapshot, SnapshotStore, StateCache, StoreError};
use crate::events::{AlertEvent, AlertLevel, TradeResultEvent, TradeStatus};
use crate::risk::RiskState;
use crate::types::{Price, Quote, Timestamp};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileParams {
    pub interval_secs: u64,
    /// Relative exposure drift tolerated before the live state is replaced.
    pub drift_tolerance: Decimal,
    pub store_timeout_ms: u64,
}

impl Default for ReconcileParams {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            drift_tolerance: dec!(0.10),
            store_timeout_ms: 5000,
        }
    }
}

impl ReconcileParams {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

// |cached - expected| / expected. nothing expected but something cached is unbounded drift
pub fn exposure_drift(cached: Quote, expected: Quote) -> Option<Decimal> {
    let expected = expected.value().abs();
    let cached = cached.value().abs();
    if expected.is_zero() {
        return if cached.is_zero() { Some(Decimal::ZERO) } else { None };
    }
    Some((cached - expected).abs() / expected)
}

pub struct Reconciler {
    state: Arc<RwLock<RiskState>>,
    store: Arc<dyn SnapshotStore>,
    cache: Option<Arc<dyn StateCache>>,
    params: ReconcileParams,
    counters: Arc<RiskCounters>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("state", &*self.state.read())
            .field("params", &self.params)
            .field("has_cache", &self.cache.is_some())
            .finish()
    }
}

impl Reconciler {
    pub fn new(
        initial: RiskState,
        store: Arc<dyn SnapshotStore>,
        params: ReconcileParams,
        counters: Arc<RiskCounters>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            store,
            cache: None,
            params,
            counters,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn StateCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn params(&self) -> &ReconcileParams {
        &self.params
    }

    pub fn counters(&self) -> &Arc<RiskCounters> {
        &self.counters
    }

    /// Clone of the live state. Readers never hold the lock across await points.
    pub fn snapshot(&self) -> RiskState {
        self.state.read().clone()
    }

    async fn fetch(&self) -> Result<Option<PortfolioSnapshot>, StoreError> {
        let timeout = self.params.store_timeout();
        match tokio::time::timeout(timeout, self.store.latest_snapshot()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }

    async fn persist(&self, state: &RiskState) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.save(state).await {
            self.counters.inconsistency();
            tracing::warn!(error = %e, version = state.version, "state cache write failed");
        }
    }

    // whole-state swap; the version never goes backwards, whichever side is ahead,
    // so a cache that ordered writes before a restart keeps accepting ours
    fn swap(&self, mut next: RiskState, now: Timestamp) -> RiskState {
        let mut guard = self.state.write();
        next.version = next.version.max(guard.version);
        next.touch(now);
        *guard = next;
        guard.clone()
    }

    pub async fn replace(&self, next: RiskState) -> RiskState {
        let stored = self.swap(next, Timestamp::now());
        self.persist(&stored).await;
        stored
    }

    async fn load_cache(&self) -> Option<RiskState> {
        let cache = self.cache.as_ref()?;
        match cache.load().await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(error = %e, "state cache unavailable at startup");
                None
            }
        }
    }

    // 8.2.1: durable snapshot wins unconditionally, then the cache, then whatever we started with.
    // the cache is read either way: its version is the floor for everything written from here on.
    pub async fn startup_sync(&self) -> SeedSource {
        let now = Timestamp::now();
        let cached = self.load_cache().await;
        let cached_version = cached.as_ref().map_or(0, |c| c.version);

        match self.fetch().await {
            Ok(Some(snapshot)) => {
                let previous = self.snapshot();
                let mut seeded = snapshot.to_risk_state(Some(&previous), now);
                seeded.version = seeded.version.max(cached_version);
                let stored = self.swap(seeded, now);
                self.counters.resync();
                tracing::info!(
                    equity = %stored.equity,
                    exposure = %stored.total_exposure,
                    daily_pnl = %stored.daily_pnl(),
                    version = stored.version,
                    "seeded risk state from durable snapshot"
                );
                self.persist(&stored).await;
                return SeedSource::DurableSnapshot;
            }
            Ok(None) => {
                tracing::info!("durable store has no snapshot yet");
            }
            Err(e) => {
                self.counters.inconsistency();
                tracing::warn!(error = %e, "durable store unavailable at startup");
            }
        }

        if let Some(cached) = cached {
            let stored = self.swap(cached, now);
            tracing::info!(version = stored.version, equity = %stored.equity, "seeded risk state from cache");
            return SeedSource::Cache;
        }

        let current = self.snapshot();
        tracing::info!(equity = %current.equity, "starting from configured equity");
        SeedSource::Defaults
    }

    // 8.2.2: compare live exposure against the store, overwrite if it drifted
    pub async fn heal_tick(&self) -> TickOutcome {
        let snapshot = match self.fetch().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return TickOutcome::NoSnapshot,
            Err(e) => {
                self.counters.inconsistency();
                tracing::warn!(error = %e, "reconciliation skipped");
                return TickOutcome::Skipped { reason: e.to_string() };
            }
        };

        let now = Timestamp::now();
        let expected = snapshot.expected_exposure();

        // compare and swap under one write lock so a fill can't slip in between
        let (outcome, stored) = {
            let mut guard = self.state.write();
            let cached = guard.total_exposure;
            let drift = exposure_drift(cached, expected);
            let within = drift.map_or(false, |d| d <= self.params.drift_tolerance);
            if within {
                let drift = drift.unwrap_or_default();
                tracing::info!(%cached, %expected, %drift, "risk state in sync");
                (TickOutcome::InSync { drift }, None)
            } else {
                let mut next = snapshot.to_risk_state(Some(&*guard), now);
                next.touch(now);
                *guard = next;
                let drift = drift.unwrap_or(Decimal::MAX);
                tracing::warn!(
                    %cached,
                    %expected,
                    %drift,
                    tolerance = %self.params.drift_tolerance,
                    "exposure drift beyond tolerance, live state replaced"
                );
                (TickOutcome::Recovered { drift }, Some(guard.clone()))
            }
        };

        if let Some(stored) = stored {
            self.counters.recovery();
            self.persist(&stored).await;
        }
        outcome
    }

    pub async fn record_order_submitted(&self) {
        let stored = {
            let mut guard = self.state.write();
            guard.pending_orders = guard.pending_orders.saturating_add(1);
            guard.touch(Timestamp::now());
            guard.clone()
        };
        self.persist(&stored).await;
    }

    // 8.2.3: fold an executor report into the live state
    pub async fn apply_trade_result(&self, result: &TradeResultEvent) -> TradeOutcome {
        self.counters.trade_result();
        let now = Timestamp::now();

        if result.status != TradeStatus::Filled {
            self.counters.execution_failure();
            let stored = {
                let mut guard = self.state.write();
                guard.pending_orders = guard.pending_orders.saturating_sub(1);
                guard.touch(now);
                guard.clone()
            };
            self.persist(&stored).await;

            let (level, code) = match result.status {
                TradeStatus::Rejected => (AlertLevel::Warning, "order_rejected"),
                _ => (AlertLevel::Critical, "order_failed"),
            };
            tracing::warn!(
                order_id = %result.order_id,
                symbol = %result.symbol,
                status = ?result.status,
                detail = result.message.as_deref().unwrap_or(""),
                "order did not fill"
            );
            let alert = AlertEvent::new(
                level,
                code,
                format!(
                    "order {} for {} ended {:?}: {}",
                    result.order_id,
                    result.symbol,
                    result.status,
                    result.message.as_deref().unwrap_or("no message")
                ),
            )
            .with_context("order_id", result.order_id.clone())
            .with_context("symbol", result.symbol.clone());
            return TradeOutcome {
                applied: false,
                realized_pnl: Quote::zero(),
                remaining: None,
                alert: Some(alert),
            };
        }

        let price = Price::new(result.price);
        let (Some(price), true) = (price, result.filled_quantity > Decimal::ZERO) else {
            self.counters.inconsistency();
            tracing::warn!(
                order_id = %result.order_id,
                quantity = %result.filled_quantity,
                price = %result.price,
                "unusable fill report ignored"
            );
            let alert = AlertEvent::new(
                AlertLevel::Warning,
                "invalid_trade_result",
                format!("fill for order {} has no usable price or quantity", result.order_id),
            )
            .with_context("order_id", result.order_id.clone());
            return TradeOutcome {
                applied: false,
                realized_pnl: Quote::zero(),
                remaining: None,
                alert: Some(alert),
            };
        };

        let (fill, stored) = {
            let mut guard = self.state.write();
            let fill = guard.apply_fill(&result.symbol, result.side, result.filled_quantity, price);
            guard.pending_orders = guard.pending_orders.saturating_sub(1);
            guard.touch(now);
            (fill, guard.clone())
        };
        tracing::info!(
            order_id = %result.order_id,
            symbol = %result.symbol,
            side = %result.side,
            quantity = %result.filled_quantity,
            %price,
            realized = %fill.realized_pnl,
            exposure = %stored.total_exposure,
            "fill applied"
        );
        self.persist(&stored).await;

        TradeOutcome {
            applied: true,
            realized_pnl: fill.realized_pnl,
            remaining: Some(fill.remaining),
            alert: None,
        }
    }

    pub async fn mark_price(&self, symbol: &str, price: Price) -> bool {
        let stored = {
            let mut guard = self.state.write();
            if !guard.mark(symbol, price) {
                return false;
            }
            guard.touch(Timestamp::now());
            guard.clone()
        };
        self.persist(&stored).await;
        true
    }

    pub async fn reset_daily(&self) {
        let stored = {
            let mut guard = self.state.write();
            guard.reset_daily();
            guard.touch(Timestamp::now());
            guard.clone()
        };
        tracing::info!(equity = %stored.equity, "daily pnl reset");
        self.persist(&stored).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::{InMemorySnapshotStore, InMemoryStateCache};
    use crate::types::Side;

    fn reconciler(store: Arc<InMemorySnapshotStore>) -> Reconciler {
        Reconciler::new(
            RiskState::new(Quote::new(dec!(100000))),
            store,
            ReconcileParams::default(),
            Arc::new(RiskCounters::new()),
        )
    }

    fn fill(status: TradeStatus) -> TradeResultEvent {
        TradeResultEvent {
            order_id: "o-1".into(),
            status,
            symbol: "BTC".into(),
            side: Side::Long,
            filled_quantity: dec!(0.2),
            price: dec!(50000),
            timestamp: None,
            message: None,
        }
    }

    #[test]
    fn drift_math() {
        let d = |c, e| exposure_drift(Quote::new(c), Quote::new(e));
        assert_eq!(d(dec!(7000), dec!(5000)), Some(dec!(0.4)));
        assert_eq!(d(dec!(5150), dec!(5000)), Some(dec!(0.03)));
        assert_eq!(d(dec!(0), dec!(0)), Some(Decimal::ZERO));
        assert_eq!(d(dec!(10), dec!(0)), None);
    }

    #[tokio::test]
    async fn startup_prefers_durable_snapshot() {
        let store = Arc::new(InMemorySnapshotStore::with_snapshot(PortfolioSnapshot::new(
            dec!(50000),
            dec!(0.10),
            Decimal::ZERO,
        )));
        let r = reconciler(store);
        assert_eq!(r.startup_sync().await, SeedSource::DurableSnapshot);
        assert_eq!(r.snapshot().equity.value(), dec!(50000));
        assert_eq!(r.counters().snapshot().resync_total, 1);
    }

    #[tokio::test]
    async fn startup_falls_back_to_cache_then_defaults() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let cache = Arc::new(InMemoryStateCache::new());
        let mut cached = RiskState::new(Quote::new(dec!(42000)));
        cached.version = 9;
        cache.save(&cached).await.unwrap();

        let r = reconciler(store.clone()).with_cache(cache);
        assert_eq!(r.startup_sync().await, SeedSource::Cache);
        assert_eq!(r.snapshot().equity.value(), dec!(42000));

        let bare = reconciler(store);
        assert_eq!(bare.startup_sync().await, SeedSource::Defaults);
        assert_eq!(bare.snapshot().equity.value(), dec!(100000));
    }

    #[tokio::test]
    async fn filled_result_updates_ledger() {
        let r = reconciler(Arc::new(InMemorySnapshotStore::new()));
        r.record_order_submitted().await;
        assert_eq!(r.snapshot().pending_orders, 1);

        let out = r.apply_trade_result(&fill(TradeStatus::Filled)).await;
        assert!(out.applied);
        let state = r.snapshot();
        assert_eq!(state.pending_orders, 0);
        assert_eq!(state.total_exposure.value(), dec!(10000));
        assert_eq!(state.positions["BTC"].quantity.value(), dec!(0.2));
    }

    #[tokio::test]
    async fn failed_results_alert() {
        let r = reconciler(Arc::new(InMemorySnapshotStore::new()));
        let rejected = r.apply_trade_result(&fill(TradeStatus::Rejected)).await;
        assert_eq!(rejected.alert.unwrap().level, AlertLevel::Warning);

        let errored = r.apply_trade_result(&fill(TradeStatus::Error)).await;
        assert_eq!(errored.alert.unwrap().level, AlertLevel::Critical);
        assert!(r.snapshot().positions.is_empty());
        assert_eq!(r.counters().snapshot().execution_failures, 2);
    }

    #[tokio::test]
    async fn zero_price_fill_is_ignored() {
        let r = reconciler(Arc::new(InMemorySnapshotStore::new()));
        let mut bad = fill(TradeStatus::Filled);
        bad.price = Decimal::ZERO;
        let out = r.apply_trade_result(&bad).await;
        assert!(!out.applied);
        assert_eq!(out.alert.unwrap().code, "invalid_trade_result");
    }

    #[tokio::test]
    async fn versions_increase_and_reach_cache() {
        let cache = Arc::new(InMemoryStateCache::new());
        let r = reconciler(Arc::new(InMemorySnapshotStore::new())).with_cache(cache.clone());
        r.record_order_submitted().await;
        let v1 = r.snapshot().version;
        r.apply_trade_result(&fill(TradeStatus::Filled)).await;
        let v2 = r.snapshot().version;
        assert!(v2 > v1);
        assert_eq!(cache.peek().unwrap().version, v2);
    }
}
