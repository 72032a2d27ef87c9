// 8.1 engine/core.rs: the risk service. one signal in, one order or alert out.

use super::counters::RiskCounters;
use super::reconcile::Reconciler;
use super::results::{EngineError, SignalOutcome, TradeOutcome};
use crate::config::RiskConfig;
use crate::events::{AlertEvent, AlertLevel, Event, EventEmitter, EventId, EventPayload, OrderEvent, TradeResultEvent};
use crate::gate::{self, RejectReason, Signal};
use crate::health::{HealthReport, HealthStatus, StatusReport};
use crate::kill_switch::{KillReason, KillSwitch};
use crate::market::MarketConditionsSource;
use crate::types::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/** 8.1: wiring for the whole control plane. cheap to share behind an Arc */
pub struct RiskService {
    config: Arc<RiskConfig>,
    reconciler: Arc<Reconciler>,
    kill_switch: Arc<KillSwitch>,
    emitter: Arc<dyn EventEmitter>,
    market: Arc<dyn MarketConditionsSource>,
    next_event_id: AtomicU64,
    started_at: Timestamp,
}

impl RiskService {
    pub fn new(
        config: RiskConfig,
        reconciler: Arc<Reconciler>,
        kill_switch: Arc<KillSwitch>,
        emitter: Arc<dyn EventEmitter>,
        market: Arc<dyn MarketConditionsSource>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            reconciler,
            kill_switch,
            emitter,
            market,
            next_event_id: AtomicU64::new(1),
            started_at: Timestamp::now(),
        })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill_switch
    }

    fn counters(&self) -> &RiskCounters {
        self.reconciler.counters()
    }

    fn emit(&self, payload: EventPayload, now: Timestamp) {
        let id = EventId(self.next_event_id.fetch_add(1, Ordering::Relaxed));
        self.emitter.emit(Event::new(id, now, payload));
    }

    fn alert(&self, alert: AlertEvent, now: Timestamp) {
        self.emit(EventPayload::Alert(alert), now);
    }

    pub async fn handle_signal(&self, signal: &Signal) -> SignalOutcome {
        self.handle_signal_at(signal, Timestamp::now()).await
    }

    // 8.1.1: kill switch, then the gate, then publish
    pub async fn handle_signal_at(&self, signal: &Signal, now: Timestamp) -> SignalOutcome {
        self.counters().signal_received();

        let switch = self.kill_switch.load_status().await;
        if switch.is_active() {
            self.counters().signal_halted();
            tracing::warn!(symbol = %signal.symbol, side = %signal.side, "kill switch active, signal dropped");
            self.alert(
                AlertEvent::new(
                    AlertLevel::Critical,
                    "kill_switch_active",
                    format!("signal {} {} dropped: kill switch active", signal.symbol, signal.side),
                )
                .with_context("symbol", signal.symbol.clone())
                .with_context("kill_reason", switch.reason.map(|r| r.as_str()).unwrap_or("UNKNOWN")),
                now,
            );
            return SignalOutcome::Halted(switch);
        }

        let state = self.reconciler.snapshot();
        let conditions = self.market.conditions(&signal.symbol);
        let decision = gate::evaluate_at(signal, &state, &self.config, &conditions, now);

        if decision.approved {
            self.counters().signal_approved();
            if let Some(order) = OrderEvent::from_decision(&decision, signal.strategy_id.clone()) {
                tracing::info!(
                    symbol = %order.symbol,
                    side = %order.side,
                    quantity = %order.quantity,
                    notional = %decision.notional,
                    "order approved"
                );
                self.reconciler.record_order_submitted().await;
                self.emit(EventPayload::Order(order), now);
            }
            return SignalOutcome::Approved(decision);
        }

        self.counters().signal_rejected();
        if let Some(alert) = AlertEvent::from_rejection(&decision) {
            self.alert(alert, now);
        }
        if decision.reason == Some(RejectReason::CircuitBreakerTriggered)
            && self.config.kill_switch.auto_activate_on_circuit_breaker
        {
            self.trip_kill_switch(&state.daily_pnl().to_string(), now);
        }
        SignalOutcome::Rejected(decision)
    }

    fn trip_kill_switch(&self, daily_pnl: &str, now: Timestamp) {
        if self.kill_switch.is_active() {
            return;
        }
        let message = format!("circuit breaker tripped, daily pnl {daily_pnl}");
        let record = self.kill_switch.activate(KillReason::CircuitBreaker, &message, None);
        self.counters().kill_switch_activation();
        self.alert(
            AlertEvent::new(AlertLevel::Critical, "kill_switch_activated", record.message)
                .with_context("reason", KillReason::CircuitBreaker.as_str()),
            now,
        );
    }

    // 8.1.2: executor report → ledger, failures → alert
    pub async fn handle_trade_result(&self, result: &TradeResultEvent) -> TradeOutcome {
        let outcome = self.reconciler.apply_trade_result(result).await;
        if let Some(alert) = &outcome.alert {
            self.alert(alert.clone(), Timestamp::now());
        }
        outcome
    }

    pub fn health(&self) -> HealthReport {
        let now = Timestamp::now();
        let kill_switch_active = self.kill_switch.is_active();
        let state = self.reconciler.snapshot();
        HealthReport {
            status: self.health_status(kill_switch_active, &state),
            uptime_secs: self.started_at.secs_until(&now),
            kill_switch_active,
            state_version: state.version,
            checked_at: now,
        }
    }

    fn health_status(&self, kill_switch_active: bool, state: &crate::risk::RiskState) -> HealthStatus {
        if kill_switch_active {
            HealthStatus::Halted
        } else if state.circuit_breaker_tripped(&self.config.limits) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        }
    }

    pub fn status(&self) -> StatusReport {
        let kill_switch = self.kill_switch.status();
        let state = self.reconciler.snapshot();
        StatusReport {
            health: self.health_status(kill_switch.is_active(), &state),
            kill_switch,
            equity: state.equity,
            daily_pnl: state.daily_pnl(),
            exposure_pct: state.exposure_pct(),
            open_positions: state.open_position_count(),
            pending_orders: state.pending_orders,
            counters: self.counters().snapshot(),
            state,
        }
    }
}
