// 3.3: funding fees. every period longs pay shorts (positive rate) or the reverse.
// positive fee = the position pays, negative = it receives.

use crate::position::PerpPosition;
use crate::types::{Quote, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FUNDING_PERIOD_HOURS: Decimal = dec!(8);

// 3.3.1: notional * rate * (hours / period), sign flipped for shorts
pub fn funding_fee(
    position: &PerpPosition,
    funding_rate: Decimal,
    hours_held: Decimal,
    period_hours: Decimal,
) -> Quote {
    if period_hours <= Decimal::ZERO {
        return Quote::zero();
    }
    let fee = position.notional().value() * funding_rate * (hours_held / period_hours);
    match position.side {
        Side::Long => Quote::new(fee),
        Side::Short => Quote::new(-fee),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingEstimate {
    pub hours_held: Decimal,
    pub periods: Decimal,
    pub fee: Quote,
    /// Fee as a fraction of notional.
    pub fee_pct: Decimal,
}

// 3.3.2: funding cost over an expected holding time
pub fn estimate_funding(
    position: &PerpPosition,
    funding_rate: Decimal,
    hours_held: Decimal,
    period_hours: Decimal,
) -> FundingEstimate {
    let fee = funding_fee(position, funding_rate, hours_held, period_hours);
    let notional = position.notional().value();
    let periods = if period_hours > Decimal::ZERO {
        hours_held / period_hours
    } else {
        Decimal::ZERO
    };
    FundingEstimate {
        hours_held,
        periods,
        fee,
        fee_pct: if notional.is_zero() { Decimal::ZERO } else { fee.value() / notional },
    }
}
