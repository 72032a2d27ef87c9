// 1.0: primitives shared by every module. prices, sizes, leverage, bps, timestamps.
// each is a newtype so sizing math can't mix a notional up with a base quantity.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

pub const MIN_LEVERAGE: Decimal = Decimal::ONE;
pub const MAX_LEVERAGE: Decimal = dec!(125);

// Long = profit when price goes up. Short = profit when price goes down.
// exchanges and upstream strategies say BUY/SELL, so those parse too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "LONG", alias = "Long", alias = "BUY", alias = "buy")]
    Long,
    #[serde(alias = "SHORT", alias = "Short", alias = "SELL", alias = "sell")]
    Short,
}

impl Side {
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => dec!(1),
            Side::Short => dec!(-1),
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    // order-side wording used on the outbound order stream
    pub fn as_order_side(&self) -> &'static str {
        match self {
            Side::Long => "BUY",
            Side::Short => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

// 1.1: signed size: positive = long, negative = short. the ledger keeps per-symbol quantity this way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedSize(Decimal);

impl SignedSize {
    pub fn new(size: Decimal) -> Self {
        Self(size)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn from_side(side: Side, abs_size: Decimal) -> Self {
        Self(side.sign() * abs_size.abs())
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn abs(&self) -> Decimal {
        self.0.abs()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn side(&self) -> Option<Side> {
        if self.is_long() {
            Some(Side::Long)
        } else if self.is_short() {
            Some(Side::Short)
        } else {
            None
        }
    }

    pub fn add(&self, delta: Decimal) -> Self {
        Self(self.0 + delta)
    }
}

impl fmt::Display for SignedSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.2: price in quote currency per unit of base. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.3: quote currency amount. equity, notional, margin, pnl, fees all use this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote(Decimal);

impl Quote {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn add(&self, other: Quote) -> Self {
        Self(self.0 + other.0)
    }

    pub fn sub(&self, other: Quote) -> Self {
        Self(self.0 - other.0)
    }

    pub fn mul(&self, factor: Decimal) -> Self {
        Self(self.0 * factor)
    }

    pub fn negate(&self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Quote {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quote {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Sum for Quote {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| acc.add(q))
    }
}

// 1.4: leverage multiplier. exchanges cap it at 125x, floor is 1x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Leverage(Decimal);

impl Leverage {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if (MIN_LEVERAGE..=MAX_LEVERAGE).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!((MIN_LEVERAGE..=MAX_LEVERAGE).contains(&value));
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    // 5x leverage → 20% of notional posted as margin
    pub fn initial_margin_fraction(&self) -> Decimal {
        Decimal::ONE / self.0
    }
}

impl TryFrom<Decimal> for Leverage {
    type Error = String;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Leverage::new(value)
            .ok_or_else(|| format!("leverage {} outside [{}, {}]", value, MIN_LEVERAGE, MAX_LEVERAGE))
    }
}

impl From<Leverage> for Decimal {
    fn from(leverage: Leverage) -> Self {
        leverage.0
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

// 1.5: basis points. 100 bps = 1%. fractional because slippage estimates are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bps(Decimal);

impl Bps {
    pub const PER_UNIT: Decimal = dec!(10000);

    pub fn new(bps: Decimal) -> Self {
        Self(bps)
    }

    pub fn from_fraction(fraction: Decimal) -> Self {
        Self(fraction * Self::PER_UNIT)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn as_fraction(&self) -> Decimal {
        self.0 / Self::PER_UNIT
    }
}

impl fmt::Display for Bps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

// 1.6: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    // seconds from self until `later`. negative when `later` is earlier.
    // saturates, so a far-past self reads as very old rather than wrapping.
    pub fn secs_until(&self, later: &Timestamp) -> Decimal {
        Decimal::new(later.0.saturating_sub(self.0), 3)
    }

    pub fn elapsed_hours(&self, other: &Timestamp) -> Decimal {
        let diff_ms = other.0.saturating_sub(self.0).unsigned_abs();
        Decimal::from(diff_ms) / dec!(3_600_000)
    }

    pub fn to_rfc3339(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| self.0.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signed_size_operations() {
        let long = SignedSize::from_side(Side::Long, dec!(10));
        assert!(long.is_long());
        assert_eq!(long.abs(), dec!(10));

        let short = SignedSize::from_side(Side::Short, dec!(10));
        assert!(short.is_short());
        assert_eq!(short.value(), dec!(-10));
        assert_eq!(short.add(dec!(10)).side(), None);
    }

    #[test]
    fn leverage_bounds() {
        assert!(Leverage::new(dec!(1)).is_some());
        assert!(Leverage::new(dec!(125)).is_some());
        assert!(Leverage::new(dec!(0.5)).is_none());
        assert!(Leverage::new(dec!(126)).is_none());

        let lev_5x = Leverage::new(dec!(5)).unwrap();
        assert_eq!(lev_5x.initial_margin_fraction(), dec!(0.2));
    }

    #[test]
    fn leverage_deserialize_rejects_out_of_range() {
        let ok: Leverage = serde_json::from_str("\"10\"").unwrap();
        assert_eq!(ok.value(), dec!(10));
        assert!(serde_json::from_str::<Leverage>("\"200\"").is_err());
    }

    #[test]
    fn bps_conversion() {
        assert_eq!(Bps::new(dec!(100)).as_fraction(), dec!(0.01)); // 1%
        assert_eq!(Bps::from_fraction(dec!(0.0055)).value(), dec!(55));
    }

    #[test]
    fn side_parses_order_wording() {
        let buy: Side = serde_json::from_str("\"BUY\"").unwrap();
        let sell: Side = serde_json::from_str("\"sell\"").unwrap();
        let short: Side = serde_json::from_str("\"short\"").unwrap();
        assert_eq!(buy, Side::Long);
        assert_eq!(sell, Side::Short);
        assert_eq!(short, Side::Short);
        assert_eq!(Side::Long.as_order_side(), "BUY");
    }

    #[test]
    fn timestamp_seconds_between() {
        let start = Timestamp::from_secs(100);
        let end = Timestamp::from_millis(161_500);
        assert_eq!(start.secs_until(&end), dec!(61.5));
        assert_eq!(end.secs_until(&start), dec!(-61.5));
    }
}
