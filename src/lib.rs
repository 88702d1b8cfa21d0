//! Replay-safe decider engine for linear step workflows.
//!
//! A workflow execution is described entirely by its append-only history of
//! [`Event`]s. Each decision cycle folds that history into a
//! [`runtime::state::WorkflowState`] and asks the decision engine what to do
//! next, producing a list of [`Decision`]s that the task broker turns into new
//! history events. Nothing is persisted between cycles.
//!
//! ```rust
//! use sagaflow::{Event, EventKind, Decision};
//! use sagaflow::runtime::decider::{WorkflowPolicy, run_decision_cycle};
//! use serde_json::json;
//!
//! let history = vec![Event::new(1, EventKind::ExecutionStarted { input: json!({"order_id": "X"}) })];
//! let decisions = run_decision_cycle(&history, &WorkflowPolicy::default()).unwrap();
//! assert!(matches!(&decisions[0], Decision::ScheduleActivity { name, .. } if name == "ValidateInput"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub mod activities;
pub mod providers;
pub mod runtime;

pub use runtime::decider::{WorkflowPolicy, decide, run_decision_cycle};
pub use runtime::registry::{ActivityError, ActivityHandler, ActivityRegistry, ActivityRegistryBuilder};
pub use runtime::state::{HistoryError, ResumeRequest, WorkflowState, reconstruct};

/// Marker recorded when an activity exhausted its retries and compensation starts.
pub const ROLLBACK_INITIATED: &str = "ROLLBACK_INITIATED";
/// Marker injected by an operator to re-enter the step sequence at a given step.
pub const RESUME_FROM_STEP: &str = "RESUME_FROM_STEP";
/// Marker recorded by the engine once a resume request has been acted on.
pub const RESUME_COMPLETED: &str = "RESUME_COMPLETED";
/// Field of a `RESUME_COMPLETED` marker holding the event id of the
/// `RESUME_FROM_STEP` marker it acknowledges.
pub const RESUME_EVENT_ID_FIELD: &str = "resumeEventId";

/// Activity that undoes the step which exhausted its retries.
pub const ROLLBACK_STEP: &str = "RollbackStep";
/// Activity that compensates the whole transaction after rollback.
pub const COMPENSATE_TRANSACTION: &str = "CompensateTransaction";

/// The business step sequence run by default, in order.
pub const DEFAULT_STEPS: [&str; 5] = ["ValidateInput", "ProcessData", "EnrichData", "SaveResults", "NotifyCompletion"];

/// One entry of an execution's history.
///
/// `event_id` is the broker-assigned sequence id; ids strictly increase along
/// the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(event_id: u64, kind: EventKind) -> Self {
        Self { event_id, kind }
    }
}

/// Event payloads.
///
/// Completion and failure events only carry a back-reference to the
/// `ActivityScheduled` event, never the activity name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventKind {
    ExecutionStarted {
        input: Value,
    },
    ActivityScheduled {
        activity_id: String,
        name: String,
        input: Value,
    },
    ActivityCompleted {
        scheduled_event_id: u64,
        result: Value,
    },
    ActivityFailed {
        scheduled_event_id: u64,
        reason: String,
        details: String,
    },
    MarkerRecorded {
        name: String,
        details: Value,
    },
    ActivityTimedOut {
        scheduled_event_id: u64,
    },
    ExecutionSignaled {
        name: String,
        input: Value,
    },
    ExecutionCompleted {
        result: Value,
    },
    ExecutionFailed {
        reason: String,
        details: String,
    },
    /// Any event type this engine does not know about.
    #[serde(other)]
    Unknown,
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::ExecutionStarted { .. } => "ExecutionStarted",
            EventKind::ActivityScheduled { .. } => "ActivityScheduled",
            EventKind::ActivityCompleted { .. } => "ActivityCompleted",
            EventKind::ActivityFailed { .. } => "ActivityFailed",
            EventKind::MarkerRecorded { .. } => "MarkerRecorded",
            EventKind::ActivityTimedOut { .. } => "ActivityTimedOut",
            EventKind::ExecutionSignaled { .. } => "ExecutionSignaled",
            EventKind::ExecutionCompleted { .. } => "ExecutionCompleted",
            EventKind::ExecutionFailed { .. } => "ExecutionFailed",
            EventKind::Unknown => "Unknown",
        }
    }
}

/// Broker-enforced timeout policy attached to every scheduled activity.
///
/// The engine never reads these; they travel with the decision so the broker
/// can enforce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTimeouts {
    pub schedule_to_start: Duration,
    pub schedule_to_close: Duration,
    pub start_to_close: Duration,
    pub heartbeat: Duration,
}

impl Default for ActivityTimeouts {
    fn default() -> Self {
        Self {
            schedule_to_start: Duration::from_secs(300),
            schedule_to_close: Duration::from_secs(600),
            start_to_close: Duration::from_secs(300),
            heartbeat: Duration::from_secs(60),
        }
    }
}

/// Output of a decision cycle. Decisions never touch history directly; the
/// broker appends the matching events, visible on the next cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decisionType", rename_all_fields = "camelCase")]
pub enum Decision {
    ScheduleActivity {
        activity_id: String,
        name: String,
        input: Value,
        timeouts: ActivityTimeouts,
    },
    RecordMarker {
        name: String,
        details: Value,
    },
    CompleteExecution {
        result: Value,
    },
    FailExecution {
        reason: String,
        details: Value,
    },
}

impl Decision {
    /// True for decisions that close the execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Decision::CompleteExecution { .. } | Decision::FailExecution { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Decision::ScheduleActivity { .. } => "ScheduleActivity",
            Decision::RecordMarker { .. } => "RecordMarker",
            Decision::CompleteExecution { .. } => "CompleteExecution",
            Decision::FailExecution { .. } => "FailExecution",
        }
    }
}

/// High-level execution status derived from history.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStatus {
    NotFound,
    Running,
    Completed { result: Value },
    Failed { reason: String, details: String },
}

impl ExecutionStatus {
    /// Derive the status from the terminal events of a history, if any.
    pub fn from_history(history: &[Event]) -> Self {
        if history.is_empty() {
            return ExecutionStatus::NotFound;
        }
        for event in history.iter().rev() {
            match &event.kind {
                EventKind::ExecutionCompleted { result } => {
                    return ExecutionStatus::Completed { result: result.clone() };
                }
                EventKind::ExecutionFailed { reason, details } => {
                    return ExecutionStatus::Failed {
                        reason: reason.clone(),
                        details: details.clone(),
                    };
                }
                _ => {}
            }
        }
        ExecutionStatus::Running
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed { .. } | ExecutionStatus::Failed { .. })
    }
}

/// Payload an operator records under [`RESUME_FROM_STEP`].
pub fn resume_marker_details(step: &str) -> Value {
    serde_json::json!({ "step": step })
}
