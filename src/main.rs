//! Risk control plane simulation.
//!
//! Wires the risk service with in-memory stores and an event collector, then
//! walks through the decisions the control plane makes in production: an
//! approval, a stale signal, the circuit breaker tripping the kill switch, a
//! partial fill, reconciliation healing a corrupted ledger, and an attributed
//! deactivation.

use anyhow::{bail, Context, Result};
use perps_risk::*;
use rust_decimal_macros::dec;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Harness {
    service: Arc<RiskService>,
    store: Arc<InMemorySnapshotStore>,
    events: Arc<EventCollector>,
}

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join("perps-risk-sim")
        .join(format!("{}-{name}.state", std::process::id()))
}

fn harness(config: &RiskConfig, state: RiskState, market: MarketConditions, name: &str) -> Result<Harness> {
    let counters = Arc::new(RiskCounters::new());
    let store = Arc::new(InMemorySnapshotStore::new());
    let reconciler = Reconciler::new(state, store.clone(), config.reconcile.clone(), counters)
        .with_cache(Arc::new(InMemoryStateCache::new()));
    let events = Arc::new(EventCollector::new());
    let service = RiskService::new(
        config.clone(),
        Arc::new(reconciler),
        Arc::new(KillSwitch::new(scratch_path(name))),
        events.clone(),
        Arc::new(MarketBoard::new(market)),
    )
    .with_context(|| format!("wiring scenario {name}"))?;

    Ok(Harness {
        service: Arc::new(service),
        store,
        events,
    })
}

fn fresh_state(config: &RiskConfig) -> RiskState {
    RiskState::new(Quote::new(config.limits.account_equity))
}

fn log_outcome(outcome: &SignalOutcome) {
    match outcome {
        SignalOutcome::Approved(d) => tracing::info!(
            symbol = %d.symbol,
            side = %d.side,
            size = %d.position_size,
            notional = %d.notional,
            stop = ?d.stop_price.map(|p| p.value()),
            liquidation_distance = ?d.liquidation_distance(),
            fill_ratio = ?d.fill_ratio(),
            "approved"
        ),
        SignalOutcome::Rejected(d) => tracing::info!(
            symbol = %d.symbol,
            reason = d.reason.map(RejectReason::as_str).unwrap_or("none"),
            detail = ?d.detail,
            "rejected"
        ),
        SignalOutcome::Halted(record) => tracing::info!(
            reason = record.reason.map(|r| r.as_str()).unwrap_or("UNKNOWN"),
            "halted by kill switch"
        ),
    }
}

async fn scenario_1_approval(config: &RiskConfig) -> Result<()> {
    println!("Scenario 1: Default BTC Long\n");
    let h = harness(config, fresh_state(config), MarketConditions::default(), "approval")?;

    let outcome = h.service.handle_signal(&Signal::new("BTC", Side::Long, 50000.0)).await;
    log_outcome(&outcome);
    if !outcome.is_approved() {
        bail!("default BTC long should pass every check");
    }
    for order in h.events.orders() {
        println!(
            "  order: {} {} {} stop {:?}",
            order.side.as_order_side(),
            order.quantity,
            order.symbol,
            order.stop_price.map(|p| p.value())
        );
    }
    println!();
    Ok(())
}

async fn scenario_2_stale_signal(config: &RiskConfig) -> Result<()> {
    println!("Scenario 2: Stale Signal\n");
    let h = harness(config, fresh_state(config), MarketConditions::default(), "stale")?;

    let old = Timestamp::now().as_millis() / 1000 - config.limits.data_stale_timeout_secs as i64 * 2;
    let signal = Signal::new("ETH", Side::Short, 2500.0).with_timestamp(RawTimestamp::Integer(old));
    let outcome = h.service.handle_signal(&signal).await;
    log_outcome(&outcome);

    for alert in h.events.alerts() {
        println!("  alert [{:?}] {}: {}", alert.level, alert.code, alert.message);
    }
    println!();
    Ok(())
}

async fn scenario_3_circuit_breaker(config: &RiskConfig) -> Result<()> {
    println!("Scenario 3: Circuit Breaker Trips the Kill Switch\n");
    let mut state = fresh_state(config);
    state.daily_realized_pnl = Quote::new(-(config.limits.account_equity * config.limits.circuit_breaker_pct));
    let h = harness(config, state, MarketConditions::default(), "breaker")?;

    let first = h.service.handle_signal(&Signal::new("BTC", Side::Long, 50000.0)).await;
    log_outcome(&first);
    let second = h.service.handle_signal(&Signal::new("SOL", Side::Long, 150.0)).await;
    log_outcome(&second);

    let health = h.service.health();
    println!("  health: {:?}, kill switch active: {}", health.status, health.kill_switch_active);
    for alert in h.events.alerts() {
        println!("  alert [{:?}] {}", alert.level, alert.code);
    }
    cleanup(h.service.kill_switch().path());
    cleanup(h.service.kill_switch().audit_path());
    println!();
    Ok(())
}

async fn scenario_4_partial_fill(config: &RiskConfig) -> Result<()> {
    println!("Scenario 4: Thin Book, Partial Fill\n");
    let mut config = config.clone();
    config.execution.depth_impact_factor = dec!(0.005);
    let thin = MarketConditions {
        book_depth: Quote::new(dec!(10000)),
        ..MarketConditions::default()
    };
    let h = harness(&config, fresh_state(&config), thin, "partial")?;

    let outcome = h.service.handle_signal(&Signal::new("BTC", Side::Long, 50000.0)).await;
    log_outcome(&outcome);
    if let Some(fill) = outcome.decision().and_then(|d| d.fill) {
        println!(
            "  requested {} filled {} ({}), slippage {}, fees {}",
            fill.requested_size, fill.filled_size, fill.fill_ratio, fill.slippage_bps, fill.fees
        );
    }
    println!();
    Ok(())
}

async fn scenario_5_reconciliation(config: &RiskConfig) -> Result<()> {
    println!("Scenario 5: Reconciliation Heals a Corrupted Ledger\n");
    let h = harness(config, fresh_state(config), MarketConditions::default(), "reconcile")?;
    h.store.set(PortfolioSnapshot::new(dec!(50000), dec!(0.10), dec!(0)));

    let reconciler = h.service.reconciler();
    let seeded = reconciler.startup_sync().await;
    println!("  seeded from {:?}: exposure {}", seeded, reconciler.snapshot().total_exposure);

    let mut corrupted = reconciler.snapshot();
    corrupted.total_exposure = Quote::new(dec!(7000));
    reconciler.replace(corrupted).await;
    let tick = reconciler.heal_tick().await;
    println!("  corrupted to 7000, tick: {:?}, exposure now {}", tick, reconciler.snapshot().total_exposure);

    let mut nudged = reconciler.snapshot();
    nudged.total_exposure = Quote::new(dec!(5150));
    reconciler.replace(nudged).await;
    let tick = reconciler.heal_tick().await;
    println!("  nudged to 5150, tick: {:?}, exposure now {}", tick, reconciler.snapshot().total_exposure);

    let counters = h.service.status().counters;
    println!(
        "  resync {} recovery {} inconsistency {}\n",
        counters.resync_total, counters.recovery_total, counters.inconsistency_total
    );
    Ok(())
}

async fn scenario_6_deactivation(config: &RiskConfig) -> Result<()> {
    println!("Scenario 6: Attributed Deactivation\n");
    let h = harness(config, fresh_state(config), MarketConditions::default(), "deactivate")?;
    let switch = h.service.kill_switch();

    switch.activate(KillReason::ExchangeError, "venue returning 5xx", None);
    if let Err(e) = switch.deactivate("", "venue recovered") {
        println!("  anonymous deactivation refused: {e}");
    }
    let record = switch
        .deactivate("oncall", "venue recovered, positions verified")
        .context("attributed deactivation")?;
    println!("  state {} by {:?}", record.state.as_str(), record.operator);

    for entry in switch.audit_log().context("reading audit log")? {
        println!("  audit: {:?} {:?} {}", entry.action, entry.operator, entry.message);
    }
    cleanup(switch.path());
    cleanup(switch.audit_path());
    println!();
    Ok(())
}

fn cleanup(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!(path = %path.display(), error = %e, "scratch file not removed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = RiskConfig::load(path.as_deref()).context("loading risk config")?;

    println!("Perpetuals Risk Control Plane Simulation");
    println!("Gate, Sizing, Margin, Execution, Reconciliation, Kill Switch\n");

    scenario_1_approval(&config).await?;
    scenario_2_stale_signal(&config).await?;
    scenario_3_circuit_breaker(&config).await?;
    scenario_4_partial_fill(&config).await?;
    scenario_5_reconciliation(&config).await?;
    scenario_6_deactivation(&config).await?;

    println!("All simulations completed successfully.");
    Ok(())
}
