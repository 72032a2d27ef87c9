//! Liquidation price and distance.
//!
//! Long:  LP = (MM - PM + entry * size) / size
//! Short: LP = (entry * size - MM + PM) / size
//!
//! In isolated mode PM is the position margin. In cross mode the whole
//! available balance backs the position, so it takes PM's place and the
//! liquidation price can fall to zero for a long.

use crate::margin::margin_requirement;
use crate::position::{MarginMode, PerpPosition};
use crate::types::{Leverage, Quote, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationProfile {
    pub liquidation_price: Decimal,
    /// |liq - entry| / entry
    pub distance: Decimal,
    pub position_margin: Quote,
    pub maintenance_margin: Quote,
    pub leverage: Leverage,
}

impl LiquidationProfile {
    pub fn meets_minimum(&self, min_distance: Decimal) -> bool {
        self.distance >= min_distance
    }
}

// 3.2.1: price where equity backing the position meets maintenance margin
pub fn liquidation_price(position: &PerpPosition, account_balance: Option<Quote>) -> Decimal {
    let req = margin_requirement(position);
    let backing = match (position.margin_mode, account_balance) {
        (MarginMode::Cross, Some(balance)) => balance.value().max(req.position.value()),
        _ => req.position.value(),
    };

    let mm = req.maintenance.value();
    let entry_value = position.entry_price.value() * position.size;

    let liq = match position.side {
        Side::Long => (mm - backing + entry_value) / position.size,
        Side::Short => (entry_value - mm + backing) / position.size,
    };
    liq.max(Decimal::ZERO)
}

pub fn liquidation_distance(position: &PerpPosition, liquidation_price: Decimal) -> Decimal {
    let entry = position.entry_price.value();
    (liquidation_price - entry).abs() / entry
}

// 3.2.2: everything the gate reports about a hypothetical position
pub fn liquidation_profile(position: &PerpPosition, account_balance: Option<Quote>) -> LiquidationProfile {
    let req = margin_requirement(position);
    let price = liquidation_price(position, account_balance);
    LiquidationProfile {
        liquidation_price: price,
        distance: liquidation_distance(position, price),
        position_margin: req.position,
        maintenance_margin: req.maintenance,
        leverage: position.leverage,
    }
}
