// 8.5 engine/runtime.rs: the long-running tasks. reconciliation runs on its own timer,
// independent of signal traffic.

use super::core::RiskService;
use super::reconcile::Reconciler;
use crate::events::TradeResultEvent;
use crate::gate::Signal;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub fn spawn_reconcile_loop(reconciler: Arc<Reconciler>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(reconciler.params().interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick is immediate; startup sync already covered it
        interval.tick().await;
        let mut trading_day = Utc::now().date_naive();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    roll_day(&reconciler, &mut trading_day, Utc::now().date_naive()).await;
                    let outcome = reconciler.heal_tick().await;
                    tracing::debug!(?outcome, "reconciliation tick");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("reconcile loop stopping");
                        break;
                    }
                }
            }
        }
    })
}

// daily pnl resets at the UTC day boundary
async fn roll_day(reconciler: &Reconciler, trading_day: &mut NaiveDate, today: NaiveDate) {
    if today != *trading_day {
        *trading_day = today;
        reconciler.reset_daily().await;
    }
}

pub async fn run_event_loop(
    service: Arc<RiskService>,
    mut signals: mpsc::Receiver<Signal>,
    mut results: mpsc::Receiver<TradeResultEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            Some(signal) = signals.recv() => {
                let outcome = service.handle_signal(&signal).await;
                tracing::debug!(symbol = %signal.symbol, approved = outcome.is_approved(), "signal handled");
            }
            Some(result) = results.recv() => {
                service.handle_trade_result(&result).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            else => break,
        }
    }
    tracing::info!("event loop stopped");
}
