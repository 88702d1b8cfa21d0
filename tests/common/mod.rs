#![allow(dead_code)]

use sagaflow::providers::TaskBroker;
use sagaflow::providers::in_memory::InMemoryBroker;
use sagaflow::runtime::{Runtime, RuntimeOptions};
use sagaflow::{ActivityRegistry, Decision, Event, EventKind, WorkflowPolicy};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

pub mod tracing_capture;

/// Builds histories with sequential event ids starting at 1.
#[derive(Debug, Clone, Default)]
pub struct HistoryBuilder {
    events: Vec<Event>,
}

impl HistoryBuilder {
    pub fn started(input: Value) -> Self {
        let mut b = Self::default();
        b.push(EventKind::ExecutionStarted { input });
        b
    }

    pub fn next_id(&self) -> u64 {
        self.events.last().map_or(1, |e| e.event_id + 1)
    }

    pub fn push(&mut self, kind: EventKind) -> u64 {
        let id = self.next_id();
        self.events.push(Event::new(id, kind));
        id
    }

    pub fn schedule(&mut self, name: &str, input: Value) -> u64 {
        let activity_id = format!("{name}-{}", self.next_id());
        self.push(EventKind::ActivityScheduled {
            activity_id,
            name: name.to_string(),
            input,
        })
    }

    pub fn complete(mut self, name: &str) -> Self {
        let sched = self.schedule(name, json!({}));
        self.push(EventKind::ActivityCompleted {
            scheduled_event_id: sched,
            result: json!({"status": "ok", "step": name}),
        });
        self
    }

    pub fn fail(mut self, name: &str) -> Self {
        let sched = self.schedule(name, json!({"order_id": "X"}));
        self.push(EventKind::ActivityFailed {
            scheduled_event_id: sched,
            reason: format!("{name} failed"),
            details: String::new(),
        });
        self
    }

    pub fn fail_times(self, name: &str, n: usize) -> Self {
        (0..n).fold(self, |b, _| b.fail(name))
    }

    pub fn marker(mut self, name: &str, details: Value) -> Self {
        self.push(EventKind::MarkerRecorded {
            name: name.to_string(),
            details,
        });
        self
    }

    /// Append the events a broker would record for `decisions`.
    pub fn apply(mut self, decisions: &[Decision]) -> Self {
        for d in decisions {
            match d {
                Decision::ScheduleActivity {
                    activity_id,
                    name,
                    input,
                    ..
                } => {
                    self.push(EventKind::ActivityScheduled {
                        activity_id: activity_id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    });
                }
                Decision::RecordMarker { name, details } => {
                    self.push(EventKind::MarkerRecorded {
                        name: name.clone(),
                        details: details.clone(),
                    });
                }
                Decision::CompleteExecution { result } => {
                    self.push(EventKind::ExecutionCompleted { result: result.clone() });
                }
                Decision::FailExecution { reason, details } => {
                    self.push(EventKind::ExecutionFailed {
                        reason: reason.clone(),
                        details: details.to_string(),
                    });
                }
            }
        }
        self
    }

    /// Id of the most recent `ActivityScheduled` event.
    pub fn last_scheduled(&self) -> Option<u64> {
        self.events
            .iter()
            .rev()
            .find(|e| matches!(e.kind, EventKind::ActivityScheduled { .. }))
            .map(|e| e.event_id)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn build(self) -> Vec<Event> {
        self.events
    }
}

pub fn order(order_id: &str) -> Value {
    json!({"order_id": order_id, "items": ["a", "b"]})
}

/// Name of a `ScheduleActivity` decision, panicking on any other kind.
pub fn scheduled_name(d: &Decision) -> &str {
    match d {
        Decision::ScheduleActivity { name, .. } => name,
        other => panic!("expected ScheduleActivity, got {other:?}"),
    }
}

/// Activity names in the order they were scheduled.
pub fn scheduled_names(history: &[Event]) -> Vec<String> {
    history
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::ActivityScheduled { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

pub fn fast_options() -> RuntimeOptions {
    RuntimeOptions {
        dispatcher_idle_sleep: Duration::from_millis(2),
        ..Default::default()
    }
}

/// Broker plus a runtime that is not polling; drive it with [`drive_until_idle`].
pub fn manual_runtime(registry: ActivityRegistry, policy: WorkflowPolicy) -> (Arc<InMemoryBroker>, Arc<Runtime>) {
    let broker = Arc::new(InMemoryBroker::new());
    let rt = Runtime::new(broker.clone() as Arc<dyn TaskBroker>, registry, policy, fast_options());
    (broker, rt)
}

/// Broker plus a runtime with background dispatchers running.
pub async fn started_runtime(registry: ActivityRegistry, policy: WorkflowPolicy) -> (Arc<InMemoryBroker>, Arc<Runtime>) {
    let broker = Arc::new(InMemoryBroker::new());
    let rt = Runtime::start(broker.clone() as Arc<dyn TaskBroker>, registry, policy, fast_options()).await;
    (broker, rt)
}

/// Alternate decision and activity cycles until neither queue has work, or
/// `max_rounds` is reached. Returns the number of rounds run.
pub async fn drive_until_idle(rt: &Runtime, max_rounds: usize) -> usize {
    for round in 0..max_rounds {
        let decided = rt.process_decision_task().await.unwrap_or(true);
        let ran = rt.process_activity_task().await.unwrap_or(true);
        if !decided && !ran {
            return round;
        }
    }
    max_rounds
}
