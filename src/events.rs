// 10.0: wire events. inbound signals and trade results come off the bus,
// outbound orders and alerts go back onto it through an EventEmitter.

use crate::gate::{RawTimestamp, RiskDecision, Signal};
use crate::types::{Price, Side, Timestamp};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Order(OrderEvent),
    Alert(AlertEvent),
}

// inbound signal is the gate's own Signal type
pub type SignalEvent = Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Filled,
    Rejected,
    Cancelled,
    Expired,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeResultEvent {
    pub order_id: String,
    pub status: TradeStatus,
    pub symbol: String,
    pub side: Side,
    pub filled_quantity: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub stop_loss_pct: Decimal,
    pub stop_price: Option<Price>,
    pub strategy_id: Option<String>,
    pub timestamp: Timestamp,
}

impl OrderEvent {
    /// None unless the decision was approved.
    pub fn from_decision(decision: &RiskDecision, strategy_id: Option<String>) -> Option<Self> {
        if !decision.approved {
            return None;
        }
        Some(Self {
            symbol: decision.symbol.clone(),
            side: decision.side,
            quantity: decision.position_size,
            stop_loss_pct: decision.stop_loss_pct.unwrap_or_default(),
            stop_price: decision.stop_price,
            strategy_id,
            timestamp: decision.evaluated_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub level: AlertLevel,
    pub code: String,
    pub message: String,
    pub context: BTreeMap<String, Value>,
}

impl AlertEvent {
    pub fn new(level: AlertLevel, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    // 10.1: rejection → alert. daily loss stops are critical, the rest warnings
    pub fn from_rejection(decision: &RiskDecision) -> Option<Self> {
        let reason = decision.reason?;
        let level = if reason.halts_trading() {
            AlertLevel::Critical
        } else {
            AlertLevel::Warning
        };
        let mut alert = AlertEvent::new(
            level,
            reason.as_str(),
            format!("signal {} {} rejected: {}", decision.symbol, decision.side, reason),
        )
        .with_context("symbol", decision.symbol.clone())
        .with_context("side", decision.side.to_string());
        if let Some(detail) = &decision.detail {
            if let Ok(value) = serde_json::to_value(detail) {
                alert = alert.with_context("detail", value);
            }
        }
        Some(alert)
    }
}

pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: Event);
}

/// Keeps everything in memory. Used by tests and the simulator.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Mutex<Vec<Event>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn orders(&self) -> Vec<OrderEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::Order(order) => Some(order.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn alerts(&self) -> Vec<AlertEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::Alert(alert) => Some(alert.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventEmitter for EventCollector {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Forwards events to a tokio channel, e.g. a bus publisher task.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelEmitter {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, event: Event) {
        if let Err(e) = self.tx.send(event) {
            tracing::warn!(event_id = e.0.id.0, "event channel closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::RejectReason;
    use rust_decimal_macros::dec;

    #[test]
    fn event_collector() {
        let collector = EventCollector::new();
        collector.emit(Event::new(
            EventId(1),
            Timestamp::from_millis(1000),
            EventPayload::Alert(AlertEvent::new(AlertLevel::Info, "test", "hello")),
        ));
        assert_eq!(collector.events().len(), 1);
        assert_eq!(collector.alerts().len(), 1);
        assert!(collector.orders().is_empty());

        collector.clear();
        assert!(collector.events().is_empty());
    }

    #[test]
    fn trade_result_parses_bus_payload() {
        let json = r#"{
            "orderId": "abc-1",
            "status": "FILLED",
            "symbol": "BTC",
            "side": "BUY",
            "filledQuantity": "0.2",
            "price": "50000",
            "timestamp": 1700000000
        }"#;
        let event: TradeResultEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.status, TradeStatus::Filled);
        assert_eq!(event.side, Side::Long);
        assert_eq!(event.filled_quantity, dec!(0.2));
    }

    #[test]
    fn unknown_status_is_tolerated() {
        let json = r#"{"orderId":"x","status":"PARTIALLY_FILLED","symbol":"ETH","side":"SELL",
            "filledQuantity":1,"price":3000}"#;
        let event: TradeResultEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.status, TradeStatus::Unknown);
    }

    #[test]
    fn channel_emitter_forwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = ChannelEmitter::new(tx);
        emitter.emit(Event::new(
            EventId(7),
            Timestamp::from_millis(0),
            EventPayload::Alert(AlertEvent::new(AlertLevel::Warning, "x", "y")),
        ));
        assert_eq!(rx.try_recv().unwrap().id, EventId(7));
    }

    #[test]
    fn rejection_alert_levels() {
        let mut decision = RiskDecision {
            approved: false,
            reason: Some(RejectReason::CircuitBreakerTriggered),
            detail: None,
            symbol: "BTC".into(),
            side: Side::Long,
            position_size: Decimal::ZERO,
            notional: crate::types::Quote::zero(),
            stop_price: None,
            stop_loss_pct: None,
            sizing_method: None,
            fill: None,
            liquidation: None,
            funding: None,
            evaluated_at: Timestamp::from_millis(0),
        };
        let alert = AlertEvent::from_rejection(&decision).unwrap();
        assert_eq!(alert.level, AlertLevel::Critical);
        assert_eq!(alert.code, "circuit_breaker_triggered");

        decision.reason = Some(RejectReason::StaleData);
        assert_eq!(AlertEvent::from_rejection(&decision).unwrap().level, AlertLevel::Warning);
        assert!(OrderEvent::from_decision(&decision, None).is_none());
    }
}
