//! Decision scenarios driven through the public decision-cycle API.

use sagaflow::runtime::decider::{COMPENSATION_FAILED, FAILED_AND_COMPENSATED, MAX_RETRIES_EXCEEDED};
use sagaflow::*;
use serde_json::{Value, json};
use std::time::Duration;

mod common;
use common::*;

fn decide_on(history: &[Event]) -> Vec<Decision> {
    run_decision_cycle(history, &WorkflowPolicy::default()).unwrap()
}

fn complete_last(mut h: HistoryBuilder, result: Value) -> HistoryBuilder {
    let sched = h.last_scheduled().unwrap();
    h.push(EventKind::ActivityCompleted {
        scheduled_event_id: sched,
        result,
    });
    h
}

fn fail_last(mut h: HistoryBuilder) -> HistoryBuilder {
    let sched = h.last_scheduled().unwrap();
    h.push(EventKind::ActivityFailed {
        scheduled_event_id: sched,
        reason: "boom".into(),
        details: String::new(),
    });
    h
}

#[test]
fn two_steps_completed_schedules_enrich_data() {
    let h = HistoryBuilder::started(order("X"))
        .complete("ValidateInput")
        .complete("ProcessData");
    let decisions = decide_on(h.events());
    assert_eq!(decisions.len(), 1);
    assert_eq!(scheduled_name(&decisions[0]), "EnrichData");

    let Decision::ScheduleActivity { input, activity_id, .. } = &decisions[0] else {
        unreachable!()
    };
    assert_eq!(input["order_id"], "X");
    assert_eq!(input["previousResults"]["ValidateInput"]["step"], "ValidateInput");
    assert_eq!(input["previousResults"]["ProcessData"]["step"], "ProcessData");
    assert_eq!(activity_id, &format!("EnrichData-{}", h.next_id()));
}

#[test]
fn all_steps_completed_completes_execution() {
    let h = DEFAULT_STEPS
        .iter()
        .fold(HistoryBuilder::started(order("X")), |h, s| h.complete(s));
    let decisions = decide_on(h.events());
    assert_eq!(decisions.len(), 1);
    let Decision::CompleteExecution { result } = &decisions[0] else {
        panic!("expected CompleteExecution, got {decisions:?}");
    };
    assert_eq!(result["status"], "completed");
    let results = result["results"].as_object().unwrap();
    assert_eq!(results.len(), 5);
    for step in DEFAULT_STEPS {
        assert_eq!(results[step]["step"], step);
    }
}

#[test]
fn fourth_failure_initiates_rollback() {
    let h = HistoryBuilder::started(order("X")).fail_times("ValidateInput", 4);
    let decisions = decide_on(h.events());
    assert_eq!(decisions.len(), 2, "{decisions:?}");

    match &decisions[0] {
        Decision::RecordMarker { name, details } => {
            assert_eq!(name, ROLLBACK_INITIATED);
            assert_eq!(details["failedActivity"], "ValidateInput");
            assert_eq!(details["reason"], MAX_RETRIES_EXCEEDED);
        }
        other => panic!("expected RecordMarker, got {other:?}"),
    }
    let Decision::ScheduleActivity { name, input, .. } = &decisions[1] else {
        panic!("expected ScheduleActivity");
    };
    assert_eq!(name, ROLLBACK_STEP);
    assert_eq!(input["stepToRollback"], "ValidateInput");
    assert_eq!(input["input"], order("X"));
}

#[test]
fn failures_within_budget_are_retried_with_original_input() {
    for failures in 1..=3 {
        let h = HistoryBuilder::started(order("X")).fail_times("ValidateInput", failures);
        let decisions = decide_on(h.events());
        assert_eq!(decisions.len(), 1);
        let Decision::ScheduleActivity { name, input, .. } = &decisions[0] else {
            panic!("expected retry after {failures} failures, got {decisions:?}");
        };
        assert_eq!(name, "ValidateInput");
        assert_eq!(input, &json!({"order_id": "X", "previousResults": {}}));
    }
}

#[test]
fn saga_runs_rollback_then_compensation_then_fails() {
    let mut h = HistoryBuilder::started(order("X"))
        .complete("ValidateInput")
        .fail_times("ProcessData", 4);

    let d = decide_on(h.events());
    assert_eq!(scheduled_name(&d[1]), ROLLBACK_STEP);
    h = complete_last(h.apply(&d), json!({"status": "rolled_back"}));

    let d = decide_on(h.events());
    assert_eq!(d.len(), 1);
    assert_eq!(scheduled_name(&d[0]), COMPENSATE_TRANSACTION);
    h = complete_last(h.apply(&d), json!({"status": "compensated"}));

    let d = decide_on(h.events());
    assert_eq!(
        d,
        vec![Decision::FailExecution {
            reason: FAILED_AND_COMPENSATED.to_string(),
            details: json!({"failedActivity": "ProcessData", "reason": MAX_RETRIES_EXCEEDED}),
        }]
    );
    assert!(d[0].is_terminal());

    let all: Vec<String> = scheduled_names(h.events());
    let after_rollback = all.iter().skip_while(|n| n.as_str() != ROLLBACK_STEP);
    assert!(after_rollback.into_iter().all(|n| n != "ProcessData"));
}

#[test]
fn rollback_step_is_redriven_until_it_completes() {
    let h = HistoryBuilder::started(order("X")).fail_times("ValidateInput", 4);
    let d = decide_on(h.events());
    // rollback scheduled, nothing answered yet
    let h = h.apply(&d);
    let again = decide_on(h.events());
    assert_eq!(again.len(), 1);
    assert_eq!(scheduled_name(&again[0]), ROLLBACK_STEP);
}

#[test]
fn exhausted_rollback_fails_with_compensation_failed() {
    let mut h = HistoryBuilder::started(order("X")).fail_times("ValidateInput", 4);
    let first = decide_on(h.events());
    h = h.apply(&first);
    h = fail_last(h);
    for _ in 0..3 {
        let d = decide_on(h.events());
        assert_eq!(scheduled_name(&d[0]), ROLLBACK_STEP);
        h = fail_last(h.apply(&d));
    }
    let d = decide_on(h.events());
    let Decision::FailExecution { reason, details } = &d[0] else {
        panic!("expected FailExecution, got {d:?}");
    };
    assert_eq!(reason, COMPENSATION_FAILED);
    assert_eq!(details["failedActivity"], ROLLBACK_STEP);
    assert_eq!(details["rollback"]["failedActivity"], "ValidateInput");
}

#[test]
fn resume_marker_reruns_completed_step_once() {
    let h = DEFAULT_STEPS
        .iter()
        .fold(HistoryBuilder::started(order("X")), |h, s| h.complete(s))
        .marker(RESUME_FROM_STEP, resume_marker_details("ProcessData"));
    let resume_id = h.next_id() - 1;

    let d = decide_on(h.events());
    assert_eq!(d.len(), 2);
    assert_eq!(scheduled_name(&d[0]), "ProcessData");
    assert_eq!(
        d[1],
        Decision::RecordMarker {
            name: RESUME_COMPLETED.to_string(),
            details: json!({"resumedStep": "ProcessData", RESUME_EVENT_ID_FIELD: resume_id}),
        }
    );

    let h = complete_last(h.apply(&d), json!({"status": "processed", "again": true}));
    let d = decide_on(h.events());
    let Decision::CompleteExecution { result } = &d[0] else {
        panic!("expected CompleteExecution, got {d:?}");
    };
    // last write wins
    assert_eq!(result["results"]["ProcessData"]["again"], true);
}

#[test]
fn resume_to_unknown_step_falls_through_to_progression() {
    let h = HistoryBuilder::started(order("X"))
        .complete("ValidateInput")
        .marker(RESUME_FROM_STEP, resume_marker_details("NoSuchStep"));
    let d = decide_on(h.events());
    assert_eq!(d.len(), 1);
    assert_eq!(scheduled_name(&d[0]), "ProcessData");
}

#[test]
fn custom_policy_controls_steps_and_budget() {
    let policy = WorkflowPolicy::new(["Reserve", "Charge"]).with_max_retries(1);
    let h = HistoryBuilder::started(json!({"order_id": "P"})).complete("Reserve");
    let d = run_decision_cycle(h.events(), &policy).unwrap();
    assert_eq!(scheduled_name(&d[0]), "Charge");

    let h = h.fail("Charge");
    let d = run_decision_cycle(h.events(), &policy).unwrap();
    assert_eq!(scheduled_name(&d[0]), "Charge");

    let h = h.fail("Charge");
    let d = run_decision_cycle(h.events(), &policy).unwrap();
    assert!(matches!(&d[0], Decision::RecordMarker { name, .. } if name == ROLLBACK_INITIATED));
}

#[test]
fn wire_format_history_is_accepted() {
    let raw = json!([
        {"eventId": 1, "type": "ExecutionStarted", "input": {"order_id": "W"}},
        {"eventId": 2, "type": "ActivityScheduled", "activityId": "ValidateInput-2", "name": "ValidateInput", "input": {}},
        {"eventId": 3, "type": "ActivityCompleted", "scheduledEventId": 2, "result": {"status": "validated"}},
        {"eventId": 4, "type": "TimerStarted", "timerId": "t-1"},
        {"eventId": 5, "type": "ExecutionSignaled", "name": "poke", "input": null}
    ]);
    let history: Vec<Event> = serde_json::from_value(raw).unwrap();
    assert_eq!(history[3].kind, EventKind::Unknown);

    let d = decide_on(&history);
    let Decision::ScheduleActivity { name, activity_id, input, .. } = &d[0] else {
        panic!("expected ScheduleActivity");
    };
    assert_eq!(name, "ProcessData");
    assert_eq!(activity_id, "ProcessData-6");
    assert_eq!(input["previousResults"]["ValidateInput"]["status"], "validated");

    let wire = serde_json::to_value(&d[0]).unwrap();
    assert_eq!(wire["decisionType"], "ScheduleActivity");
    assert_eq!(wire["activityId"], "ProcessData-6");
}

#[test]
fn dangling_back_reference_is_a_structural_error() {
    let mut h = HistoryBuilder::started(order("X"));
    let id = h.push(EventKind::ActivityCompleted {
        scheduled_event_id: 42,
        result: json!({}),
    });
    assert_eq!(
        run_decision_cycle(h.events(), &WorkflowPolicy::default()),
        Err(HistoryError::UnresolvedScheduledEvent {
            event_id: id,
            scheduled_event_id: 42
        })
    );

    let mut h = HistoryBuilder::started(order("X")).marker("NOTE", json!({}));
    h.push(EventKind::ActivityFailed {
        scheduled_event_id: 2,
        reason: "x".into(),
        details: String::new(),
    });
    assert!(matches!(
        reconstruct(h.events()),
        Err(HistoryError::NotAnActivitySchedule { scheduled_event_id: 2, .. })
    ));
}

#[test]
fn policy_timeouts_travel_with_every_schedule() {
    let timeouts = ActivityTimeouts {
        schedule_to_start: Duration::from_secs(5),
        schedule_to_close: Duration::from_secs(30),
        start_to_close: Duration::from_secs(20),
        heartbeat: Duration::from_secs(2),
    };
    let policy = WorkflowPolicy::default().with_timeouts(timeouts);
    let h = HistoryBuilder::started(order("X")).fail_times("ValidateInput", 4);
    let d = run_decision_cycle(h.events(), &policy).unwrap();
    let Decision::ScheduleActivity { name, timeouts: attached, .. } = &d[1] else {
        panic!("expected rollback schedule, got {d:?}");
    };
    assert_eq!(name, ROLLBACK_STEP);
    assert_eq!(*attached, timeouts);
}
