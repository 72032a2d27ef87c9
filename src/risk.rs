//! Account-level risk limits and the live risk ledger.
//!
//! [`RiskState`] is the snapshot the gate evaluates every signal against:
//! equity, today's PnL, notional exposure and per-symbol open quantity. The
//! reconciler owns the live copy and is the only writer; everyone else works
//! on clones.

use crate::sizing::TradeStats;
use crate::types::{Price, Quote, Side, SignedSize, Timestamp};
use crate::position::POSITION_EPSILON;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Account-wide thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Equity assumed when no durable snapshot or cache exists yet.
    pub account_equity: Decimal,
    /// Largest single position as a fraction of equity.
    pub max_position_pct: Decimal,
    /// Cap on total notional exposure as a fraction of equity.
    pub max_total_exposure_pct: Decimal,
    /// Daily loss that halts new trades.
    pub max_daily_drawdown_pct: Decimal,
    /// Harder daily loss stop, checked before drawdown.
    pub circuit_breaker_pct: Decimal,
    /// Default stop distance as a fraction of entry.
    pub stop_loss_pct: Decimal,
    /// Signals older than this are rejected.
    pub data_stale_timeout_secs: u64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            account_equity: dec!(100_000),
            max_position_pct: dec!(0.10),
            max_total_exposure_pct: dec!(0.30),
            max_daily_drawdown_pct: dec!(0.05),
            circuit_breaker_pct: dec!(0.10),
            stop_loss_pct: dec!(0.02),
            data_stale_timeout_secs: 60,
        }
    }
}

/// Open quantity for one symbol. Positive = long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub quantity: SignedSize,
    pub entry_price: Price,
    pub last_price: Price,
}

impl OpenPosition {
    pub fn side(&self) -> Option<Side> {
        self.quantity.side()
    }

    pub fn notional(&self) -> Quote {
        Quote::new(self.quantity.abs() * self.last_price.value())
    }

    pub fn unrealized_pnl(&self) -> Quote {
        Quote::new(self.quantity.value() * (self.last_price.value() - self.entry_price.value()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub equity: Quote,
    pub daily_realized_pnl: Quote,
    pub daily_unrealized_pnl: Quote,
    pub total_exposure: Quote,
    pub positions: BTreeMap<String, OpenPosition>,
    pub pending_orders: u32,
    pub stats: Option<TradeStats>,
    /// Bumped on every write so caches can drop stale copies.
    pub version: u64,
    pub updated_at: Timestamp,
}

/// What a fill did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillOutcome {
    pub realized_pnl: Quote,
    /// Quantity left for the symbol after the fill. Zero = closed.
    pub remaining: SignedSize,
}

impl RiskState {
    pub fn new(equity: Quote) -> Self {
        Self {
            equity,
            daily_realized_pnl: Quote::zero(),
            daily_unrealized_pnl: Quote::zero(),
            total_exposure: Quote::zero(),
            positions: BTreeMap::new(),
            pending_orders: 0,
            stats: None,
            version: 0,
            updated_at: Timestamp::now(),
        }
    }

    // 6.1: realized + unrealized for the day
    pub fn daily_pnl(&self) -> Quote {
        self.daily_realized_pnl.add(self.daily_unrealized_pnl)
    }

    pub fn exposure_pct(&self) -> Decimal {
        if self.equity.value() <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.total_exposure.value() / self.equity.value()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn circuit_breaker_tripped(&self, limits: &RiskLimits) -> bool {
        self.daily_pnl().value() <= -(self.equity.value() * limits.circuit_breaker_pct)
    }

    pub fn drawdown_exceeded(&self, limits: &RiskLimits) -> bool {
        self.daily_pnl().value() <= -(self.equity.value() * limits.max_daily_drawdown_pct)
    }

    // 6.2: fold one fill into the ledger. same direction averages the entry,
    // opposite direction realizes pnl on the closed part and may flip.
    pub fn apply_fill(&mut self, symbol: &str, side: Side, quantity: Decimal, price: Price) -> FillOutcome {
        let delta = side.sign() * quantity.abs();
        let mut realized = Quote::zero();

        let remaining = match self.positions.get(symbol).copied() {
            None => {
                let qty = SignedSize::new(delta);
                if qty.abs() >= POSITION_EPSILON {
                    self.positions.insert(
                        symbol.to_string(),
                        OpenPosition {
                            quantity: qty,
                            entry_price: price,
                            last_price: price,
                        },
                    );
                }
                qty
            }
            Some(existing) => {
                let old = existing.quantity.value();
                let new_qty = old + delta;
                let same_direction = old.is_sign_positive() == delta.is_sign_positive();

                let entry_price = if same_direction {
                    let weighted = old.abs() * existing.entry_price.value() + delta.abs() * price.value();
                    Price::new(weighted / new_qty.abs()).unwrap_or(existing.entry_price)
                } else {
                    let closed = old.abs().min(delta.abs());
                    realized = Quote::new(old.signum() * closed * (price.value() - existing.entry_price.value()));
                    if new_qty.signum() != old.signum() && !new_qty.is_zero() {
                        // flipped through zero: the leftover opened at this fill
                        price
                    } else {
                        existing.entry_price
                    }
                };

                if new_qty.abs() < POSITION_EPSILON {
                    self.positions.remove(symbol);
                    SignedSize::zero()
                } else {
                    self.positions.insert(
                        symbol.to_string(),
                        OpenPosition {
                            quantity: SignedSize::new(new_qty),
                            entry_price,
                            last_price: price,
                        },
                    );
                    SignedSize::new(new_qty)
                }
            }
        };

        self.daily_realized_pnl = self.daily_realized_pnl.add(realized);
        self.equity = self.equity.add(realized);
        self.revalue();

        FillOutcome {
            realized_pnl: realized,
            remaining,
        }
    }

    // 6.3: new last price for a symbol, revalues exposure and unrealized pnl
    pub fn mark(&mut self, symbol: &str, price: Price) -> bool {
        match self.positions.get_mut(symbol) {
            Some(position) => {
                position.last_price = price;
                self.revalue();
                true
            }
            None => false,
        }
    }

    pub fn revalue(&mut self) {
        self.total_exposure = self.positions.values().map(OpenPosition::notional).sum();
        self.daily_unrealized_pnl = self.positions.values().map(OpenPosition::unrealized_pnl).sum();
    }

    pub fn reset_daily(&mut self) {
        self.daily_realized_pnl = Quote::zero();
        self.daily_unrealized_pnl = Quote::zero();
    }

    pub fn touch(&mut self, now: Timestamp) {
        self.version += 1;
        self.updated_at = now;
    }
}
