// 3.0: hypothetical and live perpetual positions. size is always positive, side carries direction.
// margin, liquidation and funding math hang off this struct in margin.rs, liquidation.rs, funding.rs.

use crate::types::{Leverage, Price, Quote, Side, SignedSize};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    #[default]
    Isolated,
    Cross,
}

impl fmt::Display for MarginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarginMode::Isolated => write!(f, "isolated"),
            MarginMode::Cross => write!(f, "cross"),
        }
    }
}

/// Perpetuals settings used when the gate builds a hypothetical position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerpParams {
    pub leverage: Leverage,
    pub margin_mode: MarginMode,
    pub maintenance_margin_rate: Decimal,
    /// Smallest acceptable |liq - entry| / entry.
    pub min_liquidation_distance: Decimal,
    /// Funding rate per period, used when the market doesn't quote one.
    pub funding_rate: Decimal,
    pub funding_period_hours: Decimal,
}

impl Default for PerpParams {
    fn default() -> Self {
        Self {
            // 5x keeps liquidation ~19.5% away, clear of the 15% floor
            leverage: Leverage::new_unchecked(dec!(5)),
            margin_mode: MarginMode::Isolated,
            maintenance_margin_rate: dec!(0.005),
            min_liquidation_distance: dec!(0.15),
            funding_rate: dec!(0.0001),
            funding_period_hours: dec!(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PositionError {
    #[error("leverage {0} outside [1, 125]")]
    InvalidLeverage(Decimal),

    #[error("position size must be positive, got {0}")]
    InvalidSize(Decimal),

    #[error("entry price must be positive, got {0}")]
    InvalidEntryPrice(Decimal),

    #[error("maintenance margin rate {rate} must be in [0, {max}) at this leverage")]
    InvalidMaintenanceRate { rate: Decimal, max: Decimal },
}

// 3.1: a single-symbol perpetual position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerpPosition {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Price,
    pub leverage: Leverage,
    pub margin_mode: MarginMode,
    pub maintenance_margin_rate: Decimal,
}

impl PerpPosition {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        size: Decimal,
        entry_price: Decimal,
        leverage: Decimal,
        margin_mode: MarginMode,
        maintenance_margin_rate: Decimal,
    ) -> Result<Self, PositionError> {
        let leverage = Leverage::new(leverage).ok_or(PositionError::InvalidLeverage(leverage))?;
        if size <= Decimal::ZERO {
            return Err(PositionError::InvalidSize(size));
        }
        let entry_price = Price::new(entry_price).ok_or(PositionError::InvalidEntryPrice(entry_price))?;

        // MM must stay below the posted margin or liquidation sits past entry
        let max_rate = leverage.initial_margin_fraction();
        if maintenance_margin_rate < Decimal::ZERO || maintenance_margin_rate >= max_rate {
            return Err(PositionError::InvalidMaintenanceRate {
                rate: maintenance_margin_rate,
                max: max_rate,
            });
        }

        Ok(Self {
            symbol: symbol.into(),
            side,
            size,
            entry_price,
            leverage,
            margin_mode,
            maintenance_margin_rate,
        })
    }

    pub fn from_params(
        symbol: impl Into<String>,
        side: Side,
        size: Decimal,
        entry_price: Decimal,
        params: &PerpParams,
    ) -> Result<Self, PositionError> {
        Self::new(
            symbol,
            side,
            size,
            entry_price,
            params.leverage.value(),
            params.margin_mode,
            params.maintenance_margin_rate,
        )
    }

    pub fn signed_size(&self) -> SignedSize {
        SignedSize::from_side(self.side, self.size)
    }

    // notional at entry
    pub fn notional(&self) -> Quote {
        Quote::new(self.size * self.entry_price.value())
    }

    pub fn notional_at(&self, mark_price: Price) -> Quote {
        Quote::new(self.size * mark_price.value())
    }

    // 3.2: (mark - entry) * size, mirrored for shorts
    pub fn unrealized_pnl(&self, mark_price: Price) -> Quote {
        calculate_unrealized_pnl(self.signed_size(), self.entry_price, mark_price)
    }

    pub fn is_dust(&self) -> bool {
        self.size < POSITION_EPSILON
    }
}

/// Quantities below this are treated as a closed position.
pub const POSITION_EPSILON: Decimal = dec!(0.000001);

pub fn calculate_unrealized_pnl(size: SignedSize, entry_price: Price, mark_price: Price) -> Quote {
    Quote::new(size.value() * (mark_price.value() - entry_price.value()))
}

pub fn calculate_realized_pnl(close_size: SignedSize, entry_price: Price, exit_price: Price) -> Quote {
    Quote::new(close_size.value() * (exit_price.value() - entry_price.value()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn isolated_long(
        size: Decimal,
        entry: Decimal,
        leverage: Decimal,
        mm_rate: Decimal,
    ) -> Result<PerpPosition, PositionError> {
        PerpPosition::new("BTC", Side::Long, size, entry, leverage, MarginMode::Isolated, mm_rate)
    }

    fn btc_long() -> PerpPosition {
        isolated_long(dec!(1), dec!(50000), dec!(10), dec!(0.005)).unwrap()
    }

    #[test]
    fn unrealized_pnl_long() {
        let pos = btc_long();
        assert_eq!(pos.unrealized_pnl(Price::new_unchecked(dec!(52000))).value(), dec!(2000));
        assert_eq!(pos.unrealized_pnl(Price::new_unchecked(dec!(48000))).value(), dec!(-2000));
    }

    #[test]
    fn unrealized_pnl_short_mirrors() {
        let mut pos = btc_long();
        pos.side = Side::Short;
        assert_eq!(pos.unrealized_pnl(Price::new_unchecked(dec!(48000))).value(), dec!(2000));
        assert_eq!(pos.unrealized_pnl(Price::new_unchecked(dec!(52000))).value(), dec!(-2000));
    }

    #[test]
    fn rejects_invalid_leverage() {
        let err = isolated_long(dec!(1), dec!(50000), dec!(200), dec!(0.005));
        assert_eq!(err, Err(PositionError::InvalidLeverage(dec!(200))));

        let err = isolated_long(dec!(1), dec!(50000), dec!(0), dec!(0.005));
        assert!(matches!(err, Err(PositionError::InvalidLeverage(_))));
    }

    #[test]
    fn rejects_non_positive_size_and_price() {
        let err = isolated_long(dec!(0), dec!(50000), dec!(5), dec!(0.005));
        assert!(matches!(err, Err(PositionError::InvalidSize(_))));

        let err = isolated_long(dec!(1), dec!(-1), dec!(5), dec!(0.005));
        assert!(matches!(err, Err(PositionError::InvalidEntryPrice(_))));
    }

    #[test]
    fn rejects_maintenance_rate_above_margin() {
        // 125x posts 0.8% margin, so a 1% MM rate would liquidate on entry
        let err = isolated_long(dec!(1), dec!(50000), dec!(125), dec!(0.01));
        assert!(matches!(err, Err(PositionError::InvalidMaintenanceRate { .. })));
    }

    #[test]
    fn notional_and_dust() {
        let pos = btc_long();
        assert_eq!(pos.notional().value(), dec!(50000));

        let mut tiny = pos.clone();
        tiny.size = dec!(0.0000001);
        assert!(tiny.is_dust());
        assert!(!pos.is_dust());
    }
}
