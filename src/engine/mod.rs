// 8.0: the risk engine. wires the gate, the live state, reconciliation and the kill
// switch into one service. store and bus I/O sit behind traits.

mod core;
mod counters;
mod reconcile;
mod results;
mod runtime;
mod store;

pub use self::core::RiskService;
pub use counters::{CountersSnapshot, RiskCounters};
pub use reconcile::{exposure_drift, ReconcileParams, Reconciler};
pub use results::{EngineError, SeedSource, SignalOutcome, TickOutcome, TradeOutcome};
pub use runtime::{run_event_loop, spawn_reconcile_loop};
pub use store::{
    InMemorySnapshotStore, InMemoryStateCache, PortfolioSnapshot, SnapshotPosition, SnapshotStore, StateCache,
    StoreError,
};
