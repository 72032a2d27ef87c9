//! Property-based tests for the gate and the margin math.
//!
//! These tests verify invariants hold under random inputs.

use perps_risk::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000_000i64).prop_map(|x| Decimal::new(x, 2)) // $0.01 to $100,000
}

fn size_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..100_000i64).prop_map(|x| Decimal::new(x, 4)) // 0.0001 to 10
}

fn leverage_strategy() -> impl Strategy<Value = Decimal> {
    (1u32..=125u32).prop_map(Decimal::from)
}

fn bad_price_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(f64::NAN),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
        Just(0.0),
        (-1_000_000.0f64..0.0),
    ]
}

fn now() -> Timestamp {
    Timestamp::from_secs(1_700_000_000)
}

fn isolated(side: Side, size: Decimal, entry: Decimal, leverage: Decimal) -> PerpPosition {
    PerpPosition::new("BTC", side, size, entry, leverage, MarginMode::Isolated, dec!(0.005)).unwrap()
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Long), Just(Side::Short)]
}

proptest! {
    /// A price that is not a positive finite number never gets past step 1
    #[test]
    fn bad_price_is_invalid_signal(
        price in bad_price_strategy(),
        side in side_strategy(),
        daily_loss in 0i64..50_000i64,
    ) {
        let config = RiskConfig::default();
        let mut state = RiskState::new(Quote::new(dec!(100000)));
        state.daily_realized_pnl = Quote::new(Decimal::from(-daily_loss));

        let signal = Signal::new("BTC", side, price);
        let decision = evaluate_at(&signal, &state, &config, &MarketConditions::default(), now());
        prop_assert!(!decision.approved);
        prop_assert!(decision.position_size.is_zero());
        prop_assert_eq!(decision.reason, Some(RejectReason::InvalidSignal));
    }

    /// Any loss deep enough for the breaker reports the breaker, never drawdown
    #[test]
    fn circuit_breaker_takes_precedence(
        equity in 1_000i64..10_000_000i64,
        extra_loss_bps in 0i64..20_000i64,
    ) {
        let config = RiskConfig::default();
        let equity = Decimal::from(equity);
        let threshold = equity * config.limits.circuit_breaker_pct;
        let loss = threshold + threshold * Decimal::new(extra_loss_bps, 4);

        let mut state = RiskState::new(Quote::new(equity));
        state.daily_realized_pnl = Quote::new(-loss);

        let decision = evaluate_at(
            &Signal::new("BTC", Side::Long, 50000.0),
            &state,
            &config,
            &MarketConditions::default(),
            now(),
        );
        prop_assert_eq!(decision.reason, Some(RejectReason::CircuitBreakerTriggered));
    }

    /// Losses between the drawdown limit and the breaker report drawdown
    #[test]
    fn drawdown_between_limits(fraction_bps in 500i64..1000i64) {
        let config = RiskConfig::default();
        let mut state = RiskState::new(Quote::new(dec!(100000)));
        // strictly inside [5%, 10%)
        state.daily_realized_pnl = Quote::new(-dec!(100000) * Decimal::new(fraction_bps, 4));

        let decision = evaluate_at(
            &Signal::new("BTC", Side::Long, 50000.0),
            &state,
            &config,
            &MarketConditions::default(),
            now(),
        );
        prop_assert_eq!(decision.reason, Some(RejectReason::MaxDailyDrawdownExceeded));
    }

    /// Age past the timeout is stale; anything at or under it passes staleness
    #[test]
    fn staleness_boundary(age in 0i64..600i64) {
        let config = RiskConfig::default();
        let state = RiskState::new(Quote::new(dec!(100000)));
        let stamped = now().as_millis() / 1000 - age;
        let signal = Signal::new("BTC", Side::Long, 50000.0).with_timestamp(RawTimestamp::Integer(stamped));

        let decision = evaluate_at(&signal, &state, &config, &MarketConditions::default(), now());
        if age > config.limits.data_stale_timeout_secs as i64 {
            prop_assert_eq!(decision.reason, Some(RejectReason::StaleData));
        } else {
            prop_assert_ne!(decision.reason, Some(RejectReason::StaleData));
        }
    }

    /// Approvals never push total exposure past the limit
    #[test]
    fn approvals_respect_exposure_limit(
        existing in 0i64..40_000i64,
        price in price_strategy(),
        side in side_strategy(),
    ) {
        let config = RiskConfig::default();
        let mut state = RiskState::new(Quote::new(dec!(100000)));
        state.total_exposure = Quote::new(Decimal::from(existing));

        let signal = Signal::new("SOL", side, price.to_string().parse::<f64>().unwrap());
        let decision = evaluate_at(&signal, &state, &config, &MarketConditions::default(), now());
        if decision.approved {
            let limit = state.equity.value() * config.limits.max_total_exposure_pct;
            // size * price can round a hair above the capped notional
            prop_assert!(state.total_exposure.value() + decision.notional.value() <= limit + dec!(0.000001));
        }
    }

    /// Halving the stop distance doubles fixed fractional size
    #[test]
    fn halving_stop_doubles_size(
        equity in 1_000i64..10_000_000i64,
        price in price_strategy(),
        stop_bps in 10i64..5_000i64,
    ) {
        let equity = Quote::new(Decimal::from(equity));
        let price = Price::new_unchecked(price);
        let stop = Decimal::new(stop_bps, 4);

        let wide = fixed_fractional(equity, price, dec!(0.02), stop).unwrap();
        let tight = fixed_fractional(equity, price, dec!(0.02), stop / dec!(2)).unwrap();

        let diff = (tight.size - wide.size * dec!(2)).abs();
        prop_assert!(diff <= wide.size * dec!(0.000000001), "wide {} tight {}", wide.size, tight.size);
    }

    /// Long liquidation sits below entry, short above, for every legal leverage
    #[test]
    fn liquidation_on_losing_side(
        size in size_strategy(),
        entry in price_strategy(),
        leverage in leverage_strategy(),
    ) {
        let long = isolated(Side::Long, size, entry, leverage);
        let short = isolated(Side::Short, size, entry, leverage);

        prop_assert!(liquidation_price(&long, None) < entry);
        prop_assert!(liquidation_price(&short, None) > entry);
    }

    /// Isolated liquidation distance is 1/leverage - mmr whatever the size
    #[test]
    fn liquidation_distance_ignores_size(
        a in size_strategy(),
        b in size_strategy(),
        entry in price_strategy(),
        leverage in leverage_strategy(),
    ) {
        let mk = |size| isolated(Side::Long, size, entry, leverage);
        let da = liquidation_profile(&mk(a), None).distance;
        let db = liquidation_profile(&mk(b), None).distance;
        let expected = Decimal::ONE / leverage - dec!(0.005);

        prop_assert!((da - db).abs() < dec!(0.000000001));
        prop_assert!((da - expected).abs() < dec!(0.000000001));
    }

    /// Higher leverage never moves liquidation further away
    #[test]
    fn higher_leverage_tighter_liquidation(
        entry in price_strategy(),
        low in 1u32..=60u32,
        step in 1u32..=65u32,
    ) {
        let high = low + step;
        let mk = |lev: u32| isolated(Side::Long, dec!(1), entry, Decimal::from(lev));
        let d_low = liquidation_profile(&mk(low), None).distance;
        let d_high = liquidation_profile(&mk(high), None).distance;
        prop_assert!(d_high < d_low);
    }

    /// Unrealized PnL has the position's sign when price moves
    #[test]
    fn pnl_sign_follows_direction(
        size in size_strategy(),
        entry in price_strategy(),
        delta in -500i64..=500i64,
    ) {
        let mark = entry + Decimal::new(delta, 2);
        prop_assume!(mark > Decimal::ZERO);
        let (entry, mark) = (Price::new_unchecked(entry), Price::new_unchecked(mark));
        let long = calculate_unrealized_pnl(SignedSize::new(size), entry, mark);
        let short = calculate_unrealized_pnl(SignedSize::new(-size), entry, mark);

        prop_assert_eq!(long.value(), -short.value());
        if mark > entry {
            prop_assert!(long.value() > Decimal::ZERO);
        } else if mark < entry {
            prop_assert!(long.value() < Decimal::ZERO);
        } else {
            prop_assert!(long.value().is_zero());
        }
    }

    /// Slippage only grows with the order
    #[test]
    fn slippage_monotone_in_size(
        small in 1i64..500_000i64,
        extra in 0i64..500_000i64,
    ) {
        let sim = ExecutionSimulator::default();
        let book = MarketConditions::default().book();
        let a = sim.slippage_bps(Quote::new(Decimal::from(small)), &book);
        let b = sim.slippage_bps(Quote::new(Decimal::from(small + extra)), &book);
        prop_assert!(b >= a);
    }

    /// Drift within tolerance never replaces, beyond it always does
    #[test]
    fn drift_threshold(expected in 1i64..1_000_000i64, drift_bps in 0i64..5_000i64) {
        let expected = Decimal::from(expected);
        let cached = expected + expected * Decimal::new(drift_bps, 4);
        let drift = exposure_drift(Quote::new(cached), Quote::new(expected)).unwrap();
        let tolerance = ReconcileParams::default().drift_tolerance;
        prop_assert_eq!(drift > tolerance, drift_bps > 1_000);
    }
}

#[test]
fn cross_margin_long_can_reach_zero() {
    let pos = PerpPosition::new("BTC", Side::Long, dec!(0.1), dec!(50000), dec!(5), MarginMode::Cross, dec!(0.005))
        .unwrap();
    // balance far above notional: nothing short of zero liquidates
    assert_eq!(liquidation_price(&pos, Some(Quote::new(dec!(1_000_000)))), Decimal::ZERO);
}

#[test]
fn max_leverage_margin_calculation() {
    let pos = isolated(Side::Long, dec!(1), dec!(50000), dec!(125));
    let req = margin_requirement(&pos);
    assert_eq!(req.position.value(), dec!(400));
    assert_eq!(req.maintenance.value(), dec!(250));
    let too_high =
        PerpPosition::new("BTC", Side::Long, dec!(1), dec!(50000), dec!(126), MarginMode::Isolated, dec!(0.005));
    assert!(too_high.is_err());
}
