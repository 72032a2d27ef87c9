//! Execution cost simulator.
//!
//! Estimates what an order would actually cost before it is sent:
//!
//! slippage_bps = base
//!              + filled_notional / depth * impact_factor * 10000
//!              + volatility * volatility_multiplier * 10000
//!
//! Orders larger than `depth * fill_threshold` are filled only up to that
//! usable depth. A partial fill is reported, not treated as an error. Market
//! orders pay the taker fee; limit orders that fill pay the maker fee.

use crate::types::{Bps, Price, Quote, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionParams {
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub base_slippage_bps: Decimal,
    pub depth_impact_factor: Decimal,
    pub volatility_multiplier: Decimal,
    /// Share of book depth an order may consume before it partially fills.
    pub fill_threshold: Decimal,
    /// Gate rejects simulated fills slipping more than this.
    pub max_slippage_bps: Decimal,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            maker_fee: dec!(0.0002),
            taker_fee: dec!(0.0006),
            base_slippage_bps: dec!(5),
            depth_impact_factor: dec!(0.10),
            volatility_multiplier: dec!(2.0),
            fill_threshold: dec!(0.80),
            max_slippage_bps: dec!(100),
        }
    }
}

/// Liquidity snapshot an order is simulated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookConditions {
    /// Available depth in quote currency.
    pub depth: Quote,
    /// Short-horizon volatility as a fraction (0.002 = 0.2%).
    pub volatility: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liquidity {
    Taker,
    Maker,
    /// Nothing filled.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub side: Side,
    pub requested_size: Decimal,
    pub filled_size: Decimal,
    pub avg_price: Price,
    pub slippage_bps: Bps,
    pub fees: Quote,
    pub partial_fill: bool,
    pub fill_ratio: Decimal,
    pub liquidity: Liquidity,
}

impl ExecutionReport {
    fn unfilled(side: Side, requested_size: Decimal, reference: Price) -> Self {
        Self {
            side,
            requested_size,
            filled_size: Decimal::ZERO,
            avg_price: reference,
            slippage_bps: Bps::new(Decimal::ZERO),
            fees: Quote::zero(),
            partial_fill: false,
            fill_ratio: Decimal::ZERO,
            liquidity: Liquidity::None,
        }
    }

    pub fn filled_notional(&self) -> Quote {
        Quote::new(self.filled_size * self.avg_price.value())
    }

    pub fn is_filled(&self) -> bool {
        self.filled_size > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundtripCost {
    pub entry_slippage: Quote,
    pub exit_slippage: Quote,
    pub entry_fees: Quote,
    pub exit_fees: Quote,
    pub total_cost: Quote,
    /// Total cost relative to the average of entry and exit notional.
    pub cost_bps: Bps,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionSimulator {
    params: ExecutionParams,
}

impl ExecutionSimulator {
    pub fn new(params: ExecutionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ExecutionParams {
        &self.params
    }

    // 4.1: base + depth impact + volatility impact
    pub fn slippage_bps(&self, filled_notional: Quote, book: &BookConditions) -> Bps {
        let mut bps = self.params.base_slippage_bps;

        if book.depth.value() > Decimal::ZERO {
            let depth_ratio = filled_notional.value() / book.depth.value();
            bps += depth_ratio * self.params.depth_impact_factor * Bps::PER_UNIT;
        }
        bps += book.volatility * self.params.volatility_multiplier * Bps::PER_UNIT;

        Bps::new(bps)
    }

    // 4.2: taker fill with depth-capped size and adverse slippage
    pub fn market_order(&self, side: Side, size: Decimal, price: Price, book: &BookConditions) -> ExecutionReport {
        if size <= Decimal::ZERO {
            return ExecutionReport::unfilled(side, size, price);
        }

        let notional = size * price.value();
        let usable_depth = (book.depth.value() * self.params.fill_threshold).max(Decimal::ZERO);
        if usable_depth.is_zero() {
            tracing::debug!(%side, %size, "no usable depth, nothing fills");
            return ExecutionReport::unfilled(side, size, price);
        }

        let (filled_size, filled_notional, partial_fill) = if notional > usable_depth {
            let filled_size = usable_depth / price.value();
            tracing::debug!(
                requested = %notional,
                usable = %usable_depth,
                "partial fill against book depth"
            );
            (filled_size, usable_depth, true)
        } else {
            (size, notional, false)
        };

        let slippage = self.slippage_bps(Quote::new(filled_notional), book);
        let avg_price = adverse_price(side, price, slippage);

        ExecutionReport {
            side,
            requested_size: size,
            filled_size,
            avg_price,
            slippage_bps: slippage,
            fees: Quote::new(filled_notional * self.params.taker_fee),
            partial_fill,
            fill_ratio: if partial_fill { filled_size / size } else { Decimal::ONE },
            liquidity: Liquidity::Taker,
        }
    }

    // 4.3: a limit at or through the market fills in full at the limit as maker.
    // anything else rests and is reported unfilled.
    pub fn limit_order(&self, side: Side, size: Decimal, limit: Price, market: Price) -> ExecutionReport {
        let crosses = match side {
            Side::Long => limit >= market,
            Side::Short => limit <= market,
        };
        if size <= Decimal::ZERO || !crosses {
            return ExecutionReport::unfilled(side, size, limit);
        }

        ExecutionReport {
            side,
            requested_size: size,
            filled_size: size,
            avg_price: limit,
            slippage_bps: Bps::new(Decimal::ZERO),
            fees: Quote::new(size * limit.value() * self.params.maker_fee),
            partial_fill: false,
            fill_ratio: Decimal::ONE,
            liquidity: Liquidity::Maker,
        }
    }

    // 4.4: open on `side` at entry, close on the opposite side at exit
    pub fn roundtrip_cost(
        &self,
        side: Side,
        size: Decimal,
        entry_price: Price,
        exit_price: Price,
        book: &BookConditions,
    ) -> RoundtripCost {
        let entry = self.market_order(side, size, entry_price, book);
        let exit = self.market_order(side.opposite(), entry.filled_size, exit_price, book);

        let entry_notional = entry.filled_size * entry_price.value();
        let exit_notional = exit.filled_size * exit_price.value();
        let entry_slippage = Quote::new(entry_notional * entry.slippage_bps.as_fraction());
        let exit_slippage = Quote::new(exit_notional * exit.slippage_bps.as_fraction());
        let total = entry_slippage.add(exit_slippage).add(entry.fees).add(exit.fees);

        let avg_notional = (entry_notional + exit_notional) / dec!(2);
        let cost_bps = if avg_notional.is_zero() {
            Bps::new(Decimal::ZERO)
        } else {
            Bps::from_fraction(total.value() / avg_notional)
        };

        RoundtripCost {
            entry_slippage,
            exit_slippage,
            entry_fees: entry.fees,
            exit_fees: exit.fees,
            total_cost: total,
            cost_bps,
        }
    }
}

fn adverse_price(side: Side, price: Price, slippage: Bps) -> Price {
    let fraction = slippage.as_fraction();
    let factor = match side {
        Side::Long => Decimal::ONE + fraction,
        Side::Short => Decimal::ONE - fraction,
    };
    // a sell can't slip through zero
    price.value().checked_mul(factor).and_then(Price::new).unwrap_or(price)
}
