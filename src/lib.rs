// perps-risk: risk control plane for a perpetual futures bot.
// every signal is gated, sized and costed before an order leaves the process.
// pure math in the leaf modules; I/O only in engine/ and kill_switch.rs.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: Side, Price, Quote, Leverage, Bps, Timestamp
//   2.x  sizing.rs: fixed fractional, volatility target, kelly, atr sizing
//   3.x  position.rs: hypothetical perp position, pnl
//   3.1  margin.rs: position + maintenance margin, margin ratio
//   3.2  liquidation.rs: liquidation price and distance
//   3.3  funding.rs: funding fee per period
//   4.x  execution.rs: slippage, fees, partial fills
//   5.x  market.rs: per-symbol market conditions
//   6.x  risk.rs: limits and the live risk ledger
//   6.1  gate.rs: the ordered signal checks
//   7.x  config.rs: layered config, presets, validation
//   8.x  engine/: risk service, reconciliation, stores, runtime loops
//   9.x  kill_switch.rs: durable emergency stop + audit trail
//   10.x events.rs: bus events in and out
//   11.x health.rs: liveness and status reports

// math
pub mod execution;
pub mod funding;
pub mod liquidation;
pub mod margin;
pub mod position;
pub mod sizing;
pub mod types;

// risk decisions
pub mod gate;
pub mod market;
pub mod risk;

// service
pub mod config;
pub mod engine;
pub mod events;
pub mod health;
pub mod kill_switch;

// re exports for convenience
pub use config::{ConfigError, Environment, RiskConfig};
pub use engine::*;
pub use events::*;
pub use execution::*;
pub use funding::*;
pub use gate::*;
pub use health::*;
pub use kill_switch::*;
pub use liquidation::*;
pub use margin::*;
pub use market::*;
pub use position::*;
pub use risk::*;
pub use sizing::*;
pub use types::*;
