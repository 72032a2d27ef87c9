//! Risk gate pipeline.
//!
//! Every signal runs the same ordered checks and the first failure decides
//! the outcome:
//!
//! 1. input sanity            → `invalid_signal`
//! 2. staleness               → `invalid_timestamp_format` / `stale_data`
//! 3. circuit breaker         → `circuit_breaker_triggered`
//! 4. daily drawdown          → `max_daily_drawdown_exceeded`
//! 5. position sizing         → `zero_position_size`
//! 6. liquidation distance    → `liquidation_risk_too_high`
//! 7. total exposure          → `max_exposure_reached`
//! 8. simulated execution     → `slippage_exceeded`
//!
//! The circuit breaker runs before drawdown so the harder stop wins when
//! both are breached. Rejections come back as a [`RiskDecision`] value; alerts
//! and counters belong to the caller. Evaluation is pure: it reads a snapshot
//! copy and touches no shared state.

use crate::config::RiskConfig;
use crate::execution::{ExecutionReport, ExecutionSimulator};
use crate::funding::{estimate_funding, FundingEstimate};
use crate::liquidation::{liquidation_profile, LiquidationProfile};
use crate::market::MarketConditions;
use crate::position::PerpPosition;
use crate::risk::RiskState;
use crate::sizing::{size_position, SizingInputs, SizingMethod, SizingResult};
use crate::types::{Bps, Price, Quote, Side, Timestamp};
use chrono::{DateTime, NaiveDateTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Epoch values above this are read as milliseconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

// keeps price * size and the stop/liquidation products well inside Decimal range
const MAX_SIGNAL_PRICE: f64 = 1e15;

// 6.1.0: a proposed trade. price stays f64 so NaN and inf can be caught here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    #[serde(default)]
    pub target_notional: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub strategy_id: Option<String>,
}

impl Signal {
    pub fn new(symbol: impl Into<String>, side: Side, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price,
            target_notional: None,
            timestamp: None,
            strategy_id: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: RawTimestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_target_notional(mut self, notional: f64) -> Self {
        self.target_notional = Some(notional);
        self
    }
}

/// Timestamp as it arrived: epoch seconds, epoch millis, or text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for RawTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawTimestamp::Integer(v) => write!(f, "{v}"),
            RawTimestamp::Float(v) => write!(f, "{v}"),
            RawTimestamp::Text(v) => f.write_str(v),
        }
    }
}

// None for epochs outside what a calendar date can hold
fn epoch_to_timestamp(value: i64) -> Option<Timestamp> {
    let millis = if value.unsigned_abs() >= MILLIS_THRESHOLD as u64 {
        value
    } else {
        value.checked_mul(1000)?
    };
    representable(millis)
}

fn representable(millis: i64) -> Option<Timestamp> {
    DateTime::from_timestamp_millis(millis).map(|_| Timestamp::from_millis(millis))
}

// 6.1.1: RFC 3339, naive ISO (read as UTC), or a numeric epoch
pub fn parse_timestamp(raw: &RawTimestamp) -> Option<Timestamp> {
    match raw {
        RawTimestamp::Integer(v) => epoch_to_timestamp(*v),
        RawTimestamp::Float(v) => {
            if !v.is_finite() {
                return None;
            }
            let millis = if v.abs() >= MILLIS_THRESHOLD as f64 { *v } else { *v * 1000.0 };
            // `as` saturates, so check the range first
            if millis.abs() >= i64::MAX as f64 {
                return None;
            }
            representable(millis as i64)
        }
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Some(Timestamp::from_millis(dt.timestamp_millis()));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(Timestamp::from_millis(naive.and_utc().timestamp_millis()));
            }
            if let Ok(v) = text.parse::<i64>() {
                return epoch_to_timestamp(v);
            }
            text.parse::<f64>()
                .ok()
                .and_then(|v| parse_timestamp(&RawTimestamp::Float(v)))
        }
    }
}

/// Closed set of rejection codes. `as_str` is the wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidSignal,
    InvalidTimestampFormat,
    StaleData,
    CircuitBreakerTriggered,
    MaxDailyDrawdownExceeded,
    ZeroPositionSize,
    LiquidationRiskTooHigh,
    MaxExposureReached,
    SlippageExceeded,
}

impl RejectReason {
    pub const ALL: [RejectReason; 9] = [
        RejectReason::InvalidSignal,
        RejectReason::InvalidTimestampFormat,
        RejectReason::StaleData,
        RejectReason::CircuitBreakerTriggered,
        RejectReason::MaxDailyDrawdownExceeded,
        RejectReason::ZeroPositionSize,
        RejectReason::LiquidationRiskTooHigh,
        RejectReason::MaxExposureReached,
        RejectReason::SlippageExceeded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::InvalidSignal => "invalid_signal",
            RejectReason::InvalidTimestampFormat => "invalid_timestamp_format",
            RejectReason::StaleData => "stale_data",
            RejectReason::CircuitBreakerTriggered => "circuit_breaker_triggered",
            RejectReason::MaxDailyDrawdownExceeded => "max_daily_drawdown_exceeded",
            RejectReason::ZeroPositionSize => "zero_position_size",
            RejectReason::LiquidationRiskTooHigh => "liquidation_risk_too_high",
            RejectReason::MaxExposureReached => "max_exposure_reached",
            RejectReason::SlippageExceeded => "slippage_exceeded",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|reason| reason.as_str() == code)
    }

    /// Daily loss stops. Everything else is specific to the one signal.
    pub fn halts_trading(self) -> bool {
        matches!(
            self,
            RejectReason::CircuitBreakerTriggered | RejectReason::MaxDailyDrawdownExceeded
        )
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured diagnostics that go with a rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectDetail {
    InvalidField { field: String, value: String },
    UnparseableTimestamp { raw: String },
    Stale { age_secs: Decimal, max_age_secs: u64 },
    DailyLoss { daily_pnl: Quote, limit: Quote },
    Sizing { method: SizingMethod, notional: Quote },
    NoFill { book_depth: Quote },
    InvalidPosition { message: String },
    Liquidation { distance: Decimal, min_distance: Decimal, liquidation_price: Decimal },
    Exposure { current: Quote, requested: Quote, limit: Quote },
    Slippage { slippage_bps: Bps, max_bps: Bps },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub approved: bool,
    pub reason: Option<RejectReason>,
    pub detail: Option<RejectDetail>,
    pub symbol: String,
    pub side: Side,
    /// Base quantity to trade. Zero on rejection.
    pub position_size: Decimal,
    pub notional: Quote,
    pub stop_price: Option<Price>,
    pub stop_loss_pct: Option<Decimal>,
    pub sizing_method: Option<SizingMethod>,
    pub fill: Option<ExecutionReport>,
    pub liquidation: Option<LiquidationProfile>,
    /// Expected funding over one period on the filled size. Positive means the position pays.
    pub funding: Option<FundingEstimate>,
    pub evaluated_at: Timestamp,
}

impl RiskDecision {
    fn reject(signal: &Signal, reason: RejectReason, detail: RejectDetail, now: Timestamp) -> Self {
        tracing::debug!(
            symbol = %signal.symbol,
            side = %signal.side,
            reason = reason.as_str(),
            ?detail,
            "signal rejected"
        );
        Self {
            approved: false,
            reason: Some(reason),
            detail: Some(detail),
            symbol: signal.symbol.clone(),
            side: signal.side,
            position_size: Decimal::ZERO,
            notional: Quote::zero(),
            stop_price: None,
            stop_loss_pct: None,
            sizing_method: None,
            fill: None,
            liquidation: None,
            funding: None,
            evaluated_at: now,
        }
    }

    pub fn is_rejected(&self) -> bool {
        !self.approved
    }

    pub fn fill_ratio(&self) -> Option<Decimal> {
        self.fill.map(|f| f.fill_ratio)
    }

    pub fn liquidation_distance(&self) -> Option<Decimal> {
        self.liquidation.map(|l| l.distance)
    }
}

// 6.1.2: stop on the losing side of entry
pub fn stop_price(side: Side, entry: Price, stop_loss_pct: Decimal) -> Option<Price> {
    let factor = match side {
        Side::Long => Decimal::ONE - stop_loss_pct,
        Side::Short => Decimal::ONE + stop_loss_pct,
    };
    entry.value().checked_mul(factor).and_then(Price::new)
}

pub fn evaluate(
    signal: &Signal,
    state: &RiskState,
    config: &RiskConfig,
    market: &MarketConditions,
) -> RiskDecision {
    evaluate_at(signal, state, config, market, Timestamp::now())
}

// 6.1.3: the pipeline
pub fn evaluate_at(
    signal: &Signal,
    state: &RiskState,
    config: &RiskConfig,
    market: &MarketConditions,
    now: Timestamp,
) -> RiskDecision {
    use RejectReason::*;
    let limits = &config.limits;

    // 1. input sanity
    let price = match checked_price(signal.price) {
        Some(price) => price,
        None => {
            return RiskDecision::reject(
                signal,
                InvalidSignal,
                RejectDetail::InvalidField {
                    field: "price".into(),
                    value: signal.price.to_string(),
                },
                now,
            )
        }
    };
    let target_notional = match signal.target_notional {
        None => None,
        Some(raw) => match checked_non_negative(raw) {
            Some(target) => Some(Quote::new(target)),
            None => {
                return RiskDecision::reject(
                    signal,
                    InvalidSignal,
                    RejectDetail::InvalidField {
                        field: "target_notional".into(),
                        value: raw.to_string(),
                    },
                    now,
                )
            }
        },
    };
    if signal.symbol.trim().is_empty() {
        return RiskDecision::reject(
            signal,
            InvalidSignal,
            RejectDetail::InvalidField {
                field: "symbol".into(),
                value: signal.symbol.clone(),
            },
            now,
        );
    }

    // 2. staleness, only when the signal carries a timestamp
    if let Some(raw) = &signal.timestamp {
        let Some(ts) = parse_timestamp(raw) else {
            return RiskDecision::reject(
                signal,
                InvalidTimestampFormat,
                RejectDetail::UnparseableTimestamp { raw: raw.to_string() },
                now,
            );
        };
        let age_secs = ts.secs_until(&now).max(Decimal::ZERO);
        if age_secs > Decimal::from(limits.data_stale_timeout_secs) {
            return RiskDecision::reject(
                signal,
                StaleData,
                RejectDetail::Stale {
                    age_secs,
                    max_age_secs: limits.data_stale_timeout_secs,
                },
                now,
            );
        }
    }

    // 3. circuit breaker before 4. drawdown
    if state.circuit_breaker_tripped(limits) {
        return RiskDecision::reject(
            signal,
            CircuitBreakerTriggered,
            RejectDetail::DailyLoss {
                daily_pnl: state.daily_pnl(),
                limit: state.equity.mul(limits.circuit_breaker_pct).negate(),
            },
            now,
        );
    }
    if state.drawdown_exceeded(limits) {
        return RiskDecision::reject(
            signal,
            MaxDailyDrawdownExceeded,
            RejectDetail::DailyLoss {
                daily_pnl: state.daily_pnl(),
                limit: state.equity.mul(limits.max_daily_drawdown_pct).negate(),
            },
            now,
        );
    }

    // 5. sizing, capped by max position and any requested notional
    let sized = sized_position(signal, state, config, market, price, target_notional);
    if sized.is_zero() {
        return RiskDecision::reject(
            signal,
            ZeroPositionSize,
            RejectDetail::Sizing {
                method: sized.method,
                notional: sized.notional,
            },
            now,
        );
    }

    // 6. liquidation distance of the hypothetical position
    let balance = Some(state.equity);
    let hypothetical = PerpPosition::from_params(&signal.symbol, signal.side, sized.size, price.value(), &config.perps);
    let position = match hypothetical {
        Ok(position) => position,
        Err(err) => {
            return RiskDecision::reject(
                signal,
                LiquidationRiskTooHigh,
                RejectDetail::InvalidPosition { message: err.to_string() },
                now,
            )
        }
    };
    let profile = liquidation_profile(&position, balance);
    if !profile.meets_minimum(config.perps.min_liquidation_distance) {
        return RiskDecision::reject(
            signal,
            LiquidationRiskTooHigh,
            RejectDetail::Liquidation {
                distance: profile.distance,
                min_distance: config.perps.min_liquidation_distance,
                liquidation_price: profile.liquidation_price,
            },
            now,
        );
    }

    // 7. exposure
    let exposure_limit = state.equity.mul(limits.max_total_exposure_pct);
    if state.total_exposure.add(sized.notional) > exposure_limit {
        return RiskDecision::reject(
            signal,
            MaxExposureReached,
            RejectDetail::Exposure {
                current: state.total_exposure,
                requested: sized.notional,
                limit: exposure_limit,
            },
            now,
        );
    }

    // 8. simulated execution. partial fills shrink the order, they don't reject it
    let simulator = ExecutionSimulator::new(config.execution.clone());
    let fill = simulator.market_order(signal.side, sized.size, price, &market.book());
    if !fill.is_filled() {
        return RiskDecision::reject(
            signal,
            ZeroPositionSize,
            RejectDetail::NoFill {
                book_depth: market.book_depth,
            },
            now,
        );
    }
    let max_slippage = Bps::new(config.execution.max_slippage_bps);
    if fill.slippage_bps > max_slippage {
        return RiskDecision::reject(
            signal,
            SlippageExceeded,
            RejectDetail::Slippage {
                slippage_bps: fill.slippage_bps,
                max_bps: max_slippage,
            },
            now,
        );
    }

    // 9. approval on the filled size
    let (liquidation, filled) = if fill.partial_fill {
        let mut filled = position.clone();
        filled.size = fill.filled_size;
        (liquidation_profile(&filled, balance), filled)
    } else {
        (profile, position)
    };
    // one period of carry at the venue's rate, or the configured one
    let period_hours = config.perps.funding_period_hours;
    let funding_rate = market.funding_rate.unwrap_or(config.perps.funding_rate);
    let funding = estimate_funding(&filled, funding_rate, period_hours, period_hours);
    let stop_loss_pct = sized.stop_distance_pct.unwrap_or(limits.stop_loss_pct);

    RiskDecision {
        approved: true,
        reason: None,
        detail: None,
        symbol: signal.symbol.clone(),
        side: signal.side,
        position_size: fill.filled_size,
        notional: Quote::new(fill.filled_size * price.value()),
        stop_price: stop_price(signal.side, price, stop_loss_pct),
        stop_loss_pct: Some(stop_loss_pct),
        sizing_method: Some(sized.method),
        fill: Some(fill),
        liquidation: Some(liquidation),
        funding: Some(funding),
        evaluated_at: now,
    }
}

fn checked_price(raw: f64) -> Option<Price> {
    if !raw.is_finite() || raw > MAX_SIGNAL_PRICE {
        return None;
    }
    Decimal::from_f64(raw).and_then(Price::new)
}

fn checked_non_negative(raw: f64) -> Option<Decimal> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    Decimal::from_f64(raw)
}

// strategy output, or the capped maximum when the strategy can't run
fn sized_position(
    signal: &Signal,
    state: &RiskState,
    config: &RiskConfig,
    market: &MarketConditions,
    price: Price,
    target_notional: Option<Quote>,
) -> SizingResult {
    let limits = &config.limits;
    let max_notional = state.equity.mul(limits.max_position_pct);
    let cap = match target_notional {
        Some(target) => target.min(max_notional),
        None => max_notional,
    };
    if cap.value() <= Decimal::ZERO {
        return SizingResult::zero(config.sizing.method);
    }

    let inputs = SizingInputs {
        equity: state.equity,
        price,
        stop_loss_pct: limits.stop_loss_pct,
        annualized_volatility: market.annualized_volatility,
        atr: market.atr,
        stats: state.stats,
    };

    match size_position(&inputs, &config.sizing) {
        Ok(result) => result.capped(cap),
        Err(err) => {
            tracing::warn!(
                symbol = %signal.symbol,
                method = %config.sizing.method,
                error = %err,
                "sizing strategy unavailable, falling back to max position"
            );
            SizingResult {
                notional: cap,
                size: cap.value() / price.value(),
                method: config.sizing.method,
                risk_amount: cap.mul(limits.stop_loss_pct),
                stop_distance_pct: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn now() -> Timestamp {
        Timestamp::from_secs(1_700_000_000)
    }

    #[test]
    fn timestamp_forms() {
        assert_eq!(parse_timestamp(&RawTimestamp::Integer(1_700_000_000)), Some(now()));
        assert_eq!(parse_timestamp(&RawTimestamp::Integer(1_700_000_000_000)), Some(now()));
        assert_eq!(
            parse_timestamp(&RawTimestamp::Text("2023-11-14T22:13:20Z".into())),
            Some(now())
        );
        assert_eq!(
            parse_timestamp(&RawTimestamp::Text("2023-11-14T22:13:20".into())),
            Some(now())
        );
        assert_eq!(parse_timestamp(&RawTimestamp::Text("1700000000".into())), Some(now()));
        assert_eq!(parse_timestamp(&RawTimestamp::Text("yesterday".into())), None);
        assert_eq!(parse_timestamp(&RawTimestamp::Float(f64::NAN)), None);
    }

    #[test]
    fn raw_timestamp_deserializes_untagged() {
        let n: RawTimestamp = serde_json::from_str("1700000000").unwrap();
        let s: RawTimestamp = serde_json::from_str("\"2023-11-14T22:13:20Z\"").unwrap();
        assert_eq!(n, RawTimestamp::Integer(1_700_000_000));
        assert!(matches!(s, RawTimestamp::Text(_)));
    }

    #[test]
    fn stop_price_direction() {
        let entry = Price::new_unchecked(dec!(50000));
        assert_eq!(stop_price(Side::Long, entry, dec!(0.02)).unwrap().value(), dec!(49000));
        assert_eq!(stop_price(Side::Short, entry, dec!(0.02)).unwrap().value(), dec!(51000));
        assert!(stop_price(Side::Long, entry, dec!(1)).is_none());
    }

    #[test]
    fn reason_codes_round_trip() {
        for reason in RejectReason::ALL {
            assert_eq!(RejectReason::from_code(reason.as_str()), Some(reason));
        }
        assert_eq!(RejectReason::from_code("nope"), None);
        assert!(RejectReason::CircuitBreakerTriggered.halts_trading());
        assert!(!RejectReason::SlippageExceeded.halts_trading());
    }

    #[test]
    fn default_btc_long_is_approved() {
        let config = RiskConfig::default();
        let state = RiskState::new(Quote::new(dec!(100000)));
        let signal = Signal::new("BTC", Side::Long, 50000.0);

        let decision = evaluate_at(&signal, &state, &config, &MarketConditions::default(), now());

        assert!(decision.approved, "{:?}", decision);
        // 100k * 2% / 2% = 100k, capped at 10% of equity → 0.2 BTC
        assert_eq!(decision.position_size, dec!(0.2));
        assert_eq!(decision.stop_price.unwrap().value(), dec!(49000));
        assert_eq!(decision.liquidation_distance(), Some(dec!(0.195)));
        assert_eq!(decision.fill_ratio(), Some(Decimal::ONE));
    }

    #[test]
    fn target_notional_shrinks_position() {
        let config = RiskConfig::default();
        let state = RiskState::new(Quote::new(dec!(100000)));
        let signal = Signal::new("BTC", Side::Long, 50000.0).with_target_notional(5000.0);

        let decision = evaluate_at(&signal, &state, &config, &MarketConditions::default(), now());
        assert_eq!(decision.position_size, dec!(0.1));
    }

    #[test]
    fn zero_target_notional_is_zero_size() {
        let config = RiskConfig::default();
        let state = RiskState::new(Quote::new(dec!(100000)));
        let signal = Signal::new("BTC", Side::Long, 50000.0).with_target_notional(0.0);

        let decision = evaluate_at(&signal, &state, &config, &MarketConditions::default(), now());
        assert_eq!(decision.reason, Some(RejectReason::ZeroPositionSize));
    }

    #[test]
    fn sizing_failure_falls_back_to_cap() {
        let mut config = RiskConfig::default();
        config.sizing.method = SizingMethod::Kelly;
        let state = RiskState::new(Quote::new(dec!(100000))); // no trade stats

        let decision = evaluate_at(
            &Signal::new("BTC", Side::Long, 50000.0),
            &state,
            &config,
            &MarketConditions::default(),
            now(),
        );
        assert!(decision.approved);
        assert_eq!(decision.position_size, dec!(0.2));
    }

    #[test]
    fn empty_symbol_is_invalid() {
        let decision = evaluate_at(
            &Signal::new(" ", Side::Long, 50000.0),
            &RiskState::new(Quote::new(dec!(100000))),
            &RiskConfig::default(),
            &MarketConditions::default(),
            now(),
        );
        assert_eq!(decision.reason, Some(RejectReason::InvalidSignal));
    }
}
