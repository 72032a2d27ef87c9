// 5.0: market conditions the gate evaluates a signal against.
// two volatilities on purpose: sizing wants annualized vol, execution wants the short-horizon move.

use crate::execution::BookConditions;
use crate::types::Quote;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConditions {
    /// Annualized volatility, used by volatility-target sizing.
    pub annualized_volatility: Option<Decimal>,
    /// Short-horizon volatility, used for slippage.
    pub execution_volatility: Decimal,
    pub atr: Option<Decimal>,
    /// Order book depth in quote currency.
    pub book_depth: Quote,
    /// Current funding rate per period, if the venue quotes one.
    pub funding_rate: Option<Decimal>,
}

impl Default for MarketConditions {
    fn default() -> Self {
        Self {
            annualized_volatility: None,
            execution_volatility: dec!(0.002),
            atr: None,
            book_depth: Quote::new(dec!(1_000_000)),
            funding_rate: None,
        }
    }
}

impl MarketConditions {
    pub fn book(&self) -> BookConditions {
        BookConditions {
            depth: self.book_depth,
            volatility: self.execution_volatility,
        }
    }
}

// 5.1: where the service edge looks up conditions for a symbol
pub trait MarketConditionsSource: Send + Sync {
    fn conditions(&self, symbol: &str) -> MarketConditions;
}

/// Latest known conditions per symbol, with a fallback for unknown symbols.
#[derive(Debug, Default)]
pub struct MarketBoard {
    fallback: MarketConditions,
    by_symbol: RwLock<HashMap<String, MarketConditions>>,
}

impl MarketBoard {
    pub fn new(fallback: MarketConditions) -> Self {
        Self {
            fallback,
            by_symbol: RwLock::new(HashMap::new()),
        }
    }

    pub fn update(&self, symbol: impl Into<String>, conditions: MarketConditions) {
        self.by_symbol.write().insert(symbol.into(), conditions);
    }

    pub fn remove(&self, symbol: &str) -> Option<MarketConditions> {
        self.by_symbol.write().remove(symbol)
    }
}

impl MarketConditionsSource for MarketBoard {
    fn conditions(&self, symbol: &str) -> MarketConditions {
        self.by_symbol.read().get(symbol).copied().unwrap_or(self.fallback)
    }
}
