//! Margin requirements for a single perpetual position.
//!
//! Position margin (PM) is what the trader posts: notional divided by
//! leverage. Maintenance margin (MM) is the floor the position equity may
//! not cross: notional times the maintenance rate. The margin ratio
//! MM / (PM + unrealized PnL) reaches 1.0 exactly at the liquidation price.

use crate::position::PerpPosition;
use crate::types::{Leverage, Price, Quote};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Margin ratio at which a position is flagged as close to liquidation.
pub const MARGIN_WARNING_RATIO: Decimal = dec!(0.8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginRequirement {
    pub position: Quote,
    pub maintenance: Quote,
    pub leverage: Leverage,
}

pub fn position_margin(notional: Quote, leverage: Leverage) -> Quote {
    notional.mul(leverage.initial_margin_fraction())
}

pub fn maintenance_margin(notional: Quote, maintenance_margin_rate: Decimal) -> Quote {
    notional.mul(maintenance_margin_rate)
}

pub fn margin_requirement(position: &PerpPosition) -> MarginRequirement {
    let notional = position.notional();
    MarginRequirement {
        position: position_margin(notional, position.leverage),
        maintenance: maintenance_margin(notional, position.maintenance_margin_rate),
        leverage: position.leverage,
    }
}

/// MM / (PM + unrealized PnL) at `mark_price`. None once position equity is gone.
pub fn margin_ratio(position: &PerpPosition, mark_price: Price) -> Option<Decimal> {
    let req = margin_requirement(position);
    let equity = req.position.add(position.unrealized_pnl(mark_price));
    if equity.value() <= Decimal::ZERO {
        return None;
    }
    Some(req.maintenance.value() / equity.value())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginStatus {
    Healthy,
    Warning,
    Liquidatable,
}

pub fn evaluate_margin_status(position: &PerpPosition, mark_price: Price) -> MarginStatus {
    match margin_ratio(position, mark_price) {
        None => MarginStatus::Liquidatable,
        Some(ratio) if ratio >= Decimal::ONE => MarginStatus::Liquidatable,
        Some(ratio) if ratio >= MARGIN_WARNING_RATIO => MarginStatus::Warning,
        Some(_) => MarginStatus::Healthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::MarginMode;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn position(leverage: Decimal) -> PerpPosition {
        PerpPosition::new("BTC", Side::Long, dec!(0.1), dec!(50000), leverage, MarginMode::Isolated, dec!(0.005))
            .unwrap()
    }

    #[test]
    fn margin_at_10x() {
        let req = margin_requirement(&position(dec!(10)));
        // 5000 notional / 10x = 500 posted
        assert_eq!(req.position.value(), dec!(500));
        // 5000 * 0.5% = 25 maintenance
        assert_eq!(req.maintenance.value(), dec!(25));
    }

    #[test]
    fn ratio_at_entry() {
        // 25 / 500 = 5%
        let ratio = margin_ratio(&position(dec!(10)), Price::new_unchecked(dec!(50000))).unwrap();
        assert_eq!(ratio, dec!(0.05));
    }

    #[test]
    fn ratio_hits_one_at_liquidation_price() {
        // 10x long liquidates at 45250: equity 500 - 475 = 25 = MM
        let pos = position(dec!(10));
        let ratio = margin_ratio(&pos, Price::new_unchecked(dec!(45250))).unwrap();
        assert_eq!(ratio, Decimal::ONE);
        assert_eq!(evaluate_margin_status(&pos, Price::new_unchecked(dec!(45250))), MarginStatus::Liquidatable);
    }

    #[test]
    fn status_progression() {
        let pos = position(dec!(10));
        assert_eq!(evaluate_margin_status(&pos, Price::new_unchecked(dec!(50000))), MarginStatus::Healthy);
        // equity 500 - 470 = 30, 25/30 ≈ 0.83
        assert_eq!(evaluate_margin_status(&pos, Price::new_unchecked(dec!(45300))), MarginStatus::Warning);
        // equity wiped out
        assert_eq!(evaluate_margin_status(&pos, Price::new_unchecked(dec!(40000))), MarginStatus::Liquidatable);
    }
}
