//! Kill switch persistence across restarts and its effect on the service.

use perps_risk::*;
use rust_decimal_macros::dec;
use std::fs;
use std::sync::Arc;
use std::thread;

fn service(path: &std::path::Path) -> (RiskService, Arc<EventCollector>) {
    let events = Arc::new(EventCollector::new());
    let reconciler = Arc::new(Reconciler::new(
        RiskState::new(Quote::new(dec!(100000))),
        Arc::new(InMemorySnapshotStore::new()),
        ReconcileParams::default(),
        Arc::new(RiskCounters::new()),
    ));
    let service = RiskService::new(
        RiskConfig::default(),
        reconciler,
        Arc::new(KillSwitch::new(path)),
        events.clone(),
        Arc::new(MarketBoard::default()),
    )
    .unwrap();
    (service, events)
}

#[test]
fn activation_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("kill_switch.state");

    {
        let ks = KillSwitch::new(&path);
        ks.activate(KillReason::AuthFailure, "api key revoked", Some("ops"));
    }

    let reopened = KillSwitch::new(&path);
    let record = reopened.status();
    assert!(record.is_active());
    assert_eq!(record.reason, Some(KillReason::AuthFailure));
    assert_eq!(record.message, "api key revoked");
    assert!(record.activated_at.is_some());

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("state=ACTIVE"), "{raw}");
}

#[test]
fn deactivation_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kill_switch.state");

    let ks = KillSwitch::new(&path);
    ks.activate(KillReason::Manual, "deploy", None);
    ks.deactivate("dana", "deploy finished").unwrap();

    let reopened = KillSwitch::new(&path);
    let record = reopened.status();
    assert!(!record.is_active());
    assert_eq!(record.operator.as_deref(), Some("dana"));

    let actions: Vec<_> = reopened.audit_log().unwrap().into_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Activate, AuditAction::Deactivate]);
}

#[test]
fn another_process_writing_the_record_is_seen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kill_switch.state");
    let ours = KillSwitch::new(&path);
    assert!(!ours.is_active());

    // an operator tool with its own handle
    KillSwitch::new(&path).activate(KillReason::ExchangeError, "venue halted", Some("cli"));
    assert!(ours.is_active());
}

#[tokio::test]
async fn restarted_service_stays_halted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kill_switch.state");

    {
        let (svc, _) = service(&path);
        svc.kill_switch().activate(KillReason::RiskLimit, "exposure breach", None);
    }

    let (svc, events) = service(&path);
    let outcome = svc.handle_signal(&Signal::new("BTC", Side::Long, 50000.0)).await;
    match outcome {
        SignalOutcome::Halted(record) => assert_eq!(record.reason, Some(KillReason::RiskLimit)),
        other => panic!("expected halt, got {other:?}"),
    }
    assert!(events.orders().is_empty());
    let alert = &events.alerts()[0];
    assert_eq!(alert.level, AlertLevel::Critical);
    assert_eq!(alert.code, "kill_switch_active");

    svc.kill_switch().deactivate("erin", "limits reset").unwrap();
    assert!(svc.handle_signal(&Signal::new("BTC", Side::Long, 50000.0)).await.is_approved());
}

#[test]
fn corrupt_record_halts_until_operator_clears_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kill_switch.state");
    fs::write(&path, "garbage without keys").unwrap();

    let ks = KillSwitch::new(&path);
    assert_eq!(ks.status().reason, Some(KillReason::SystemError));

    ks.deactivate("frank", "record rebuilt").unwrap();
    assert!(!ks.is_active());
}

#[test]
fn concurrent_activations_leave_a_valid_record() {
    let dir = tempfile::tempdir().unwrap();
    let ks = Arc::new(KillSwitch::new(dir.path().join("kill_switch.state")));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ks = ks.clone();
            thread::spawn(move || {
                ks.activate(KillReason::SystemError, &format!("worker {i}"), None);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let record = KillSwitch::new(ks.path()).status();
    assert!(record.is_active());
    assert_eq!(record.reason, Some(KillReason::SystemError));
    assert_eq!(ks.audit_log().unwrap().len(), 8);
}
