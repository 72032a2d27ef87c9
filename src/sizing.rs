//! Position sizing strategies.
//!
//! Four interchangeable ways of turning account equity and market statistics
//! into a proposed position. All of them return the same [`SizingResult`] so
//! the gate never needs to know which one ran. None of them apply account
//! level caps (max position %, exposure); that is the gate's job.

use crate::types::{Price, Quote};
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TRADING_DAYS_PER_YEAR: Decimal = dec!(252);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    #[default]
    FixedFractional,
    #[serde(alias = "volatility", alias = "vol_target")]
    VolatilityTarget,
    #[serde(alias = "kelly_criterion")]
    Kelly,
    #[serde(alias = "atr_based")]
    Atr,
}

impl SizingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingMethod::FixedFractional => "fixed_fractional",
            SizingMethod::VolatilityTarget => "volatility_target",
            SizingMethod::Kelly => "kelly",
            SizingMethod::Atr => "atr",
        }
    }
}

impl fmt::Display for SizingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingParams {
    pub method: SizingMethod,
    /// Fraction of equity put at risk per trade (fixed fractional, ATR).
    pub risk_per_trade: Decimal,
    /// Annualized volatility the position should contribute.
    pub target_volatility: Decimal,
    /// Multiplier applied to full Kelly. 0.25 = quarter Kelly.
    pub kelly_fraction: Decimal,
    /// Stop distance in ATRs.
    pub atr_multiplier: Decimal,
}

impl Default for SizingParams {
    fn default() -> Self {
        Self {
            method: SizingMethod::FixedFractional,
            risk_per_trade: dec!(0.02),
            target_volatility: dec!(0.20),
            kelly_fraction: dec!(0.25),
            atr_multiplier: dec!(2.0),
        }
    }
}

/// Historical trade statistics feeding the Kelly strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TradeStats {
    pub win_rate: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
}

/// Everything a strategy may look at. Strategies that need a missing input fail with a [`SizingError`].
#[derive(Debug, Clone, Copy)]
pub struct SizingInputs {
    pub equity: Quote,
    pub price: Price,
    /// Stop distance as a fraction of entry, used by fixed fractional.
    pub stop_loss_pct: Decimal,
    pub annualized_volatility: Option<Decimal>,
    pub atr: Option<Decimal>,
    pub stats: Option<TradeStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizingResult {
    pub notional: Quote,
    /// Base-asset quantity.
    pub size: Decimal,
    pub method: SizingMethod,
    pub risk_amount: Quote,
    /// Where the strategy wants its stop, as a fraction of entry. None = use the configured stop.
    pub stop_distance_pct: Option<Decimal>,
}

impl SizingResult {
    pub fn zero(method: SizingMethod) -> Self {
        Self {
            notional: Quote::zero(),
            size: Decimal::ZERO,
            method,
            risk_amount: Quote::zero(),
            stop_distance_pct: None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.size <= Decimal::ZERO
    }

    // shrinks notional to `cap`, scaling size and risk with it
    pub fn capped(self, cap: Quote) -> Self {
        if self.notional <= cap || self.notional.value().is_zero() {
            return self;
        }
        let scale = cap.value() / self.notional.value();
        Self {
            notional: cap,
            size: self.size * scale,
            risk_amount: self.risk_amount.mul(scale),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SizingError {
    #[error("stop distance must be positive, got {0}")]
    InvalidStopDistance(Decimal),

    #[error("volatility targeting needs a positive asset volatility")]
    MissingVolatility,

    #[error("ATR sizing needs a positive ATR")]
    MissingAtr,

    #[error("Kelly sizing needs trade history")]
    MissingTradeStats,

    #[error("win rate must be strictly between 0 and 1, got {0}")]
    InvalidWinRate(Decimal),

    #[error("average win and average loss must be positive (win {avg_win}, loss {avg_loss})")]
    InvalidPayoff { avg_win: Decimal, avg_loss: Decimal },
}

// 2.1: dispatches to the configured strategy
pub fn size_position(inputs: &SizingInputs, params: &SizingParams) -> Result<SizingResult, SizingError> {
    if inputs.equity.value() <= Decimal::ZERO {
        return Ok(SizingResult::zero(params.method));
    }

    match params.method {
        SizingMethod::FixedFractional => fixed_fractional(
            inputs.equity,
            inputs.price,
            params.risk_per_trade,
            inputs.stop_loss_pct,
        ),
        SizingMethod::VolatilityTarget => volatility_target(
            inputs.equity,
            inputs.price,
            params.target_volatility,
            inputs.annualized_volatility.ok_or(SizingError::MissingVolatility)?,
        ),
        SizingMethod::Kelly => kelly(
            inputs.equity,
            inputs.price,
            inputs.stats.ok_or(SizingError::MissingTradeStats)?,
            params.kelly_fraction,
        ),
        SizingMethod::Atr => atr_based(
            inputs.equity,
            inputs.price,
            inputs.atr.ok_or(SizingError::MissingAtr)?,
            params.atr_multiplier,
            params.risk_per_trade,
        ),
    }
}

// 2.2: size = (equity * risk) / (price * stop). a tighter stop buys a bigger position.
pub fn fixed_fractional(
    equity: Quote,
    price: Price,
    risk_fraction: Decimal,
    stop_distance_pct: Decimal,
) -> Result<SizingResult, SizingError> {
    if stop_distance_pct <= Decimal::ZERO {
        return Err(SizingError::InvalidStopDistance(stop_distance_pct));
    }

    let risk_amount = equity.mul(risk_fraction);
    let size = risk_amount.value() / (price.value() * stop_distance_pct);

    Ok(SizingResult {
        notional: Quote::new(size * price.value()),
        size,
        method: SizingMethod::FixedFractional,
        risk_amount,
        stop_distance_pct: Some(stop_distance_pct),
    })
}

// 2.3: notional = equity * target_vol / asset_vol. calm markets get bigger positions.
pub fn volatility_target(
    equity: Quote,
    price: Price,
    target_volatility: Decimal,
    asset_volatility: Decimal,
) -> Result<SizingResult, SizingError> {
    if asset_volatility <= Decimal::ZERO {
        return Err(SizingError::MissingVolatility);
    }

    let notional = equity.value() * target_volatility / asset_volatility;
    // daily 1-sigma move on the position
    let daily_vol = TRADING_DAYS_PER_YEAR
        .sqrt()
        .map(|root| asset_volatility / root)
        .unwrap_or(asset_volatility);

    Ok(SizingResult {
        notional: Quote::new(notional),
        size: notional / price.value(),
        method: SizingMethod::VolatilityTarget,
        risk_amount: Quote::new(notional * daily_vol),
        stop_distance_pct: None,
    })
}

/// Fractional Kelly bet size as a fraction of equity, clamped to [0, 1].
pub fn kelly_fraction(stats: &TradeStats, fraction: Decimal) -> Result<Decimal, SizingError> {
    if stats.win_rate <= Decimal::ZERO || stats.win_rate >= Decimal::ONE {
        return Err(SizingError::InvalidWinRate(stats.win_rate));
    }
    if stats.avg_win <= Decimal::ZERO || stats.avg_loss <= Decimal::ZERO {
        return Err(SizingError::InvalidPayoff {
            avg_win: stats.avg_win,
            avg_loss: stats.avg_loss,
        });
    }

    let loss_rate = Decimal::ONE - stats.win_rate;
    let full = (stats.win_rate * stats.avg_win - loss_rate * stats.avg_loss) / stats.avg_win;
    if full <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }

    Ok((full * fraction).min(Decimal::ONE))
}

// 2.4: kelly criterion. negative edge sizes to zero
pub fn kelly(
    equity: Quote,
    price: Price,
    stats: TradeStats,
    fraction: Decimal,
) -> Result<SizingResult, SizingError> {
    let k = kelly_fraction(&stats, fraction)?;
    if k.is_zero() {
        return Ok(SizingResult::zero(SizingMethod::Kelly));
    }

    let notional = equity.mul(k);
    Ok(SizingResult {
        notional,
        size: notional.value() / price.value(),
        method: SizingMethod::Kelly,
        risk_amount: notional.mul(stats.avg_loss),
        stop_distance_pct: None,
    })
}

// 2.5: stop sits ATR * multiplier away; risk a fixed slice of equity against it
pub fn atr_based(
    equity: Quote,
    price: Price,
    atr: Decimal,
    multiplier: Decimal,
    risk_fraction: Decimal,
) -> Result<SizingResult, SizingError> {
    if atr <= Decimal::ZERO {
        return Err(SizingError::MissingAtr);
    }
    let stop_distance = atr * multiplier;
    if stop_distance <= Decimal::ZERO {
        return Err(SizingError::InvalidStopDistance(stop_distance));
    }

    let risk_amount = equity.mul(risk_fraction);
    let size = risk_amount.value() / stop_distance;

    Ok(SizingResult {
        notional: Quote::new(size * price.value()),
        size,
        method: SizingMethod::Atr,
        risk_amount,
        stop_distance_pct: Some(stop_distance / price.value()),
    })
}
