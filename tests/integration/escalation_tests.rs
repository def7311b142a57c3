//! Escalation handler integration tests.

use std::time::Duration;

use futures_lite::future::block_on;
use lineguard::app::ports::BatchHandler;
use lineguard::config::EscalationConfig;
use lineguard::error::{CommandError, Error, TwinError};
use lineguard::escalation::{ErrorEscalation, ErrorOutcome, KpiEscalation, KpiOutcome, RateChange};
use serde_json::json;

use crate::mock_ports::{Journal, MockCommands, MockTwin};

fn error_event(wo: &str) -> String {
    json!({ "Workorderid": wo, "DeviceErrors": 2, "Faults": ["PowerFailure"] }).to_string()
}

fn error_mask_event(wo: &str, mask: i64) -> String {
    json!({ "Workorderid": wo, "DeviceErrors": mask }).to_string()
}

fn kpi_alert(wo: &str) -> String {
    json!({ "Workorderid": wo, "Kpi": 72.5 }).to_string()
}

// ── Error escalation ──────────────────────────────────────────

#[test]
fn three_errors_in_one_batch_stop_once_and_reset() {
    let twin = MockTwin::new();
    twin.own("W1", "D1");
    let commands = MockCommands::new();
    let handler = ErrorEscalation::new(&twin, &commands, &EscalationConfig::default());

    block_on(handler.on_batch(&[error_event("W1"), error_event("W1"), error_event("W1")]));

    assert_eq!(commands.stops_to("D1"), 1);
    assert_eq!(commands.calls.borrow()[0].2, Duration::from_secs(30));
    assert_eq!(handler.tally().count("W1"), 0);
}

#[test]
fn below_threshold_never_stops() {
    let twin = MockTwin::new();
    twin.own("W1", "D1");
    let commands = MockCommands::new();
    let handler = ErrorEscalation::new(&twin, &commands, &EscalationConfig::default());

    block_on(handler.on_batch(&[error_event("W1"), error_event("W1")]));

    assert!(commands.calls.borrow().is_empty());
    assert!(twin.calls.borrow().is_empty(), "no lookup below threshold");
    assert_eq!(handler.tally().count("W1"), 2);
}

#[test]
fn counts_are_per_work_order() {
    let twin = MockTwin::new();
    twin.own("W1", "D1");
    twin.own("W2", "D2");
    let commands = MockCommands::new();
    let handler = ErrorEscalation::new(&twin, &commands, &EscalationConfig::default());

    block_on(handler.on_batch(&[
        error_event("W1"),
        error_event("W2"),
        error_event("W1"),
        error_event("W2"),
        error_event("W1"),
    ]));

    assert_eq!(commands.stops_to("D1"), 1);
    assert_eq!(commands.stops_to("D2"), 0);
    assert_eq!(handler.tally().count("W2"), 2);
}

#[test]
fn unresolved_work_order_keeps_count_and_retries() {
    let twin = MockTwin::new();
    let commands = MockCommands::new();
    let handler = ErrorEscalation::new(&twin, &commands, &EscalationConfig::default());

    block_on(async {
        handler.on_batch(&[error_event("W2"), error_event("W2")]).await;
        let third = handler.handle_event(&error_event("W2")).await.unwrap();
        assert_eq!(
            third,
            ErrorOutcome::Unresolved {
                workorder: "W2".into(),
                count: 3
            }
        );
    });
    assert!(commands.calls.borrow().is_empty());
    assert_eq!(handler.tally().count("W2"), 3);

    // The line picks the order up; the next error stops it.
    twin.own("W2", "D2");
    block_on(handler.on_batch(&[error_event("W2")]));
    assert_eq!(commands.stops_to("D2"), 1);
    assert_eq!(handler.tally().count("W2"), 0);
}

#[test]
fn failed_stop_still_resets() {
    let twin = MockTwin::new();
    twin.own("W1", "D1");
    let commands = MockCommands::new();
    *commands.failure.borrow_mut() = Some(CommandError::Timeout(Duration::from_secs(30)));
    let handler = ErrorEscalation::new(&twin, &commands, &EscalationConfig::default());

    let outcome = block_on(async {
        handler.handle_event(&error_event("W1")).await.unwrap();
        handler.handle_event(&error_event("W1")).await.unwrap();
        handler.handle_event(&error_event("W1")).await.unwrap()
    });

    assert!(matches!(
        outcome,
        ErrorOutcome::Stopped {
            status: Err(CommandError::Timeout(_)),
            ..
        }
    ));
    assert_eq!(commands.calls.borrow().len(), 1, "no retry");
    assert_eq!(handler.tally().count("W1"), 0);
}

#[test]
fn twin_query_failure_keeps_count() {
    let twin = MockTwin::new();
    twin.fail_query.set(true);
    let commands = MockCommands::new();
    let cfg = EscalationConfig {
        error_threshold: 1,
        ..EscalationConfig::default()
    };
    let handler = ErrorEscalation::new(&twin, &commands, &cfg);

    let r = block_on(handler.handle_event(&error_event("W1")));
    assert_eq!(r, Err(Error::Twin(TwinError::Unavailable)));
    assert_eq!(handler.tally().count("W1"), 1);
    assert!(commands.calls.borrow().is_empty());
}

#[test]
fn malformed_events_are_skipped_not_fatal() {
    let twin = MockTwin::new();
    twin.own("W1", "D1");
    let commands = MockCommands::new();
    let handler = ErrorEscalation::new(&twin, &commands, &EscalationConfig::default());

    block_on(handler.on_batch(&[
        error_event("W1"),
        "not json".to_string(),
        json!({ "DeviceErrors": 1 }).to_string(),
        json!({ "Workorderid": "" }).to_string(),
        error_event("W1"),
        error_event("W1"),
    ]));

    assert_eq!(commands.stops_to("D1"), 1);
    assert_eq!(handler.tally().len(), 1);
}

#[test]
fn cleared_errors_are_not_counted() {
    let twin = MockTwin::new();
    twin.own("W1", "D1");
    let commands = MockCommands::new();
    let handler = ErrorEscalation::new(&twin, &commands, &EscalationConfig::default());

    // Startup report, one fault, then the reset that clears it.
    block_on(handler.on_batch(&[
        error_mask_event("W1", 0),
        error_mask_event("W1", 2),
        error_mask_event("W1", 0),
    ]));

    assert_eq!(commands.stops_to("D1"), 0);
    assert_eq!(handler.tally().count("W1"), 1);

    let outcome = block_on(handler.handle_event(&error_mask_event("W1", 0))).unwrap();
    assert_eq!(outcome, ErrorOutcome::Cleared { workorder: "W1".into() });
}

#[test]
fn error_event_without_mask_is_rejected() {
    let twin = MockTwin::new();
    let commands = MockCommands::new();
    let handler = ErrorEscalation::new(&twin, &commands, &EscalationConfig::default());

    let r = block_on(handler.handle_event(&json!({ "Workorderid": "W1" }).to_string()));
    assert!(matches!(r, Err(Error::Event(_))));
    assert_eq!(handler.tally().count("W1"), 0);
}

#[test]
fn six_errors_stop_twice() {
    let twin = MockTwin::new();
    twin.own("W1", "D1");
    let commands = MockCommands::new();
    let handler = ErrorEscalation::new(&twin, &commands, &EscalationConfig::default());
    let batch: Vec<String> = (0..6).map(|_| error_event("W1")).collect();

    block_on(handler.on_batch(&batch));

    assert_eq!(commands.stops_to("D1"), 2);
    assert_eq!(handler.tally().count("W1"), 0);
}

// ── KPI escalation ────────────────────────────────────────────

#[test]
fn kpi_alert_throttles_then_stops() {
    let journal = Journal::default();
    let twin = MockTwin::with_journal(journal.clone());
    twin.own("W5", "Device_1");
    twin.set_desired("ProductionRate", json!(80));
    twin.etag.set(41);
    let commands = MockCommands::with_journal(journal.clone());
    let handler = KpiEscalation::new(&twin, &commands, &EscalationConfig::default(), 100);

    block_on(handler.on_batch(&[kpi_alert("W5")]));

    assert_eq!(
        journal.entries(),
        vec![
            "twin.update_desired Device_1".to_string(),
            "command.EmergencyStop Device_1".to_string(),
        ]
    );
    let writes = twin.desired_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0["ProductionRate"], 70);
    assert_eq!(writes[0].1, Some(41));
    assert_eq!(commands.stops_to("Device_1"), 1);
}

#[test]
fn kpi_rate_defaults_and_floors() {
    let twin = MockTwin::new();
    twin.own("W1", "D1");
    let commands = MockCommands::new();
    let handler = KpiEscalation::new(&twin, &commands, &EscalationConfig::default(), 100);

    let first = block_on(handler.handle_event(&kpi_alert("W1"))).unwrap();
    let KpiOutcome::Handled { rate, .. } = first else {
        panic!("expected handled outcome");
    };
    assert_eq!(rate, Ok(RateChange { from: 100, to: 90 }));

    twin.set_desired("ProductionRate", json!(4));
    let second = block_on(handler.handle_event(&kpi_alert("W1"))).unwrap();
    let KpiOutcome::Handled { rate, .. } = second else {
        panic!("expected handled outcome");
    };
    assert_eq!(rate, Ok(RateChange { from: 4, to: 0 }));

    twin.set_desired("ProductionRate", json!("fast"));
    let third = block_on(handler.handle_event(&kpi_alert("W1"))).unwrap();
    let KpiOutcome::Handled { rate, .. } = third else {
        panic!("expected handled outcome");
    };
    assert_eq!(rate, Ok(RateChange { from: 100, to: 90 }));
}

#[test]
fn kpi_failed_throttle_still_stops() {
    let twin = MockTwin::new();
    twin.own("W1", "D1");
    twin.fail_update_desired.set(true);
    let commands = MockCommands::new();
    let handler = KpiEscalation::new(&twin, &commands, &EscalationConfig::default(), 100);

    let outcome = block_on(handler.handle_event(&kpi_alert("W1"))).unwrap();

    assert!(matches!(
        outcome,
        KpiOutcome::Handled {
            rate: Err(TwinError::Rejected(_)),
            stop: Ok(200),
            ..
        }
    ));
    assert_eq!(commands.stops_to("D1"), 1);
}

#[test]
fn kpi_unresolved_does_nothing() {
    let twin = MockTwin::new();
    let commands = MockCommands::new();
    let handler = KpiEscalation::new(&twin, &commands, &EscalationConfig::default(), 100);

    block_on(handler.on_batch(&[kpi_alert("W404"), "{}".to_string()]));

    assert!(twin.desired_writes().is_empty());
    assert!(commands.calls.borrow().is_empty());
}

#[test]
fn kpi_every_alert_is_single_shot() {
    let twin = MockTwin::new();
    twin.own("W1", "D1");
    let commands = MockCommands::new();
    let handler = KpiEscalation::new(&twin, &commands, &EscalationConfig::default(), 100);

    block_on(handler.on_batch(&[kpi_alert("W1"), kpi_alert("W1")]));

    assert_eq!(twin.desired_writes().len(), 2);
    assert_eq!(commands.stops_to("D1"), 2);
}
