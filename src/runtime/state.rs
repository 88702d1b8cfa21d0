//! Workflow state reconstruction.
//!
//! [`reconstruct`] folds a history into a [`WorkflowState`] snapshot. The fold
//! is total on well-formed histories and reads nothing but its input, so the
//! same history always yields the same state.

use crate::{Event, EventKind, RESUME_COMPLETED, RESUME_EVENT_ID_FIELD, RESUME_FROM_STEP};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Structural problem in a history that makes it impossible to reconstruct
/// state. Never recoverable by retrying the same history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// A completion or failure points at an event id that is not in the history.
    UnresolvedScheduledEvent { event_id: u64, scheduled_event_id: u64 },
    /// A completion or failure points at an event that is not an `ActivityScheduled`.
    NotAnActivitySchedule { event_id: u64, scheduled_event_id: u64 },
    /// Two events share the same id.
    DuplicateEventId { event_id: u64 },
    /// Event ids do not increase along the history.
    OutOfOrder { previous: u64, event_id: u64 },
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryError::UnresolvedScheduledEvent {
                event_id,
                scheduled_event_id,
            } => write!(
                f,
                "event {event_id} references scheduled event {scheduled_event_id} which is not in history"
            ),
            HistoryError::NotAnActivitySchedule {
                event_id,
                scheduled_event_id,
            } => write!(
                f,
                "event {event_id} references event {scheduled_event_id} which is not an ActivityScheduled event"
            ),
            HistoryError::DuplicateEventId { event_id } => write!(f, "duplicate event id {event_id}"),
            HistoryError::OutOfOrder { previous, event_id } => {
                write!(f, "event id {event_id} follows {previous}; history must be ordered")
            }
        }
    }
}

impl std::error::Error for HistoryError {}

/// Snapshot of an execution, rebuilt from scratch on every decision cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    /// Activities that completed at least once, in first-completion order.
    pub completed_activities: Vec<String>,
    /// Every failure, in history order. Names repeat across retries.
    pub failed_activities: Vec<String>,
    /// Execution input from the first `ExecutionStarted` event.
    pub input: Value,
    /// Latest result per activity name.
    pub results: BTreeMap<String, Value>,
    /// Failure count per activity name.
    pub retry_count: BTreeMap<String, u32>,
    /// Latest details per marker name.
    pub markers: BTreeMap<String, Value>,

    /// Input of the most recent schedule per activity name.
    pub scheduled_inputs: BTreeMap<String, Value>,
    /// Activity whose most recent outcome is a failure that nothing has
    /// superseded yet.
    pub pending_failure: Option<String>,
    /// Latest `RESUME_FROM_STEP` request, until a `RESUME_COMPLETED` marker
    /// naming its event id acknowledges it.
    pub pending_resume: Option<ResumeRequest>,
    /// Highest event id in the history, 0 when empty.
    pub last_event_id: u64,
}

impl WorkflowState {
    pub fn is_completed(&self, name: &str) -> bool {
        self.completed_activities.iter().any(|a| a == name)
    }

    pub fn retries(&self, name: &str) -> u32 {
        self.retry_count.get(name).copied().unwrap_or(0)
    }

    pub fn marker(&self, name: &str) -> Option<&Value> {
        self.markers.get(name)
    }

    pub fn has_marker(&self, name: &str) -> bool {
        self.markers.contains_key(name)
    }

    /// Most recent failure entry, if any.
    pub fn last_failed(&self) -> Option<&str> {
        self.failed_activities.last().map(String::as_str)
    }
}

/// An operator request to re-enter the step sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    /// Event id of the `RESUME_FROM_STEP` marker.
    pub marker_event_id: u64,
    pub step: String,
}

/// Index `eventId -> activity name` over every `ActivityScheduled` event, and
/// the set of all event ids so dangling references can be told apart from
/// references to the wrong kind of event.
struct ScheduleIndex<'a> {
    names: HashMap<u64, &'a str>,
    all_ids: HashSet<u64>,
}

impl<'a> ScheduleIndex<'a> {
    fn build(history: &'a [Event]) -> Result<Self, HistoryError> {
        let mut names = HashMap::new();
        let mut all_ids = HashSet::with_capacity(history.len());
        let mut previous: Option<u64> = None;
        for event in history {
            if !all_ids.insert(event.event_id) {
                return Err(HistoryError::DuplicateEventId { event_id: event.event_id });
            }
            if let Some(prev) = previous {
                if event.event_id < prev {
                    return Err(HistoryError::OutOfOrder {
                        previous: prev,
                        event_id: event.event_id,
                    });
                }
            }
            previous = Some(event.event_id);
            if let EventKind::ActivityScheduled { name, .. } = &event.kind {
                names.insert(event.event_id, name.as_str());
            }
        }
        Ok(Self { names, all_ids })
    }

    fn resolve(&self, event_id: u64, scheduled_event_id: u64) -> Result<&'a str, HistoryError> {
        if let Some(name) = self.names.get(&scheduled_event_id) {
            return Ok(*name);
        }
        if self.all_ids.contains(&scheduled_event_id) {
            Err(HistoryError::NotAnActivitySchedule {
                event_id,
                scheduled_event_id,
            })
        } else {
            Err(HistoryError::UnresolvedScheduledEvent {
                event_id,
                scheduled_event_id,
            })
        }
    }
}

/// Fold `history` into a [`WorkflowState`].
///
/// Events are applied in order. Kinds the engine does not act on are skipped.
/// A completion or failure whose back-reference cannot be resolved to an
/// `ActivityScheduled` event is a [`HistoryError`]; nothing is guessed.
pub fn reconstruct(history: &[Event]) -> Result<WorkflowState, HistoryError> {
    let index = ScheduleIndex::build(history)?;
    let mut state = WorkflowState::default();
    let mut started = false;

    for event in history {
        state.last_event_id = state.last_event_id.max(event.event_id);
        match &event.kind {
            EventKind::ExecutionStarted { input } => {
                if !started {
                    state.input = input.clone();
                    started = true;
                }
            }
            EventKind::ActivityScheduled { name, input, .. } => {
                state.scheduled_inputs.insert(name.clone(), input.clone());
            }
            EventKind::ActivityCompleted {
                scheduled_event_id,
                result,
            } => {
                let name = index.resolve(event.event_id, *scheduled_event_id)?;
                if !state.is_completed(name) {
                    state.completed_activities.push(name.to_string());
                }
                state.results.insert(name.to_string(), result.clone());
                if state.pending_failure.as_deref() == Some(name) {
                    state.pending_failure = None;
                }
            }
            EventKind::ActivityFailed { scheduled_event_id, .. } => {
                let name = index.resolve(event.event_id, *scheduled_event_id)?;
                state.failed_activities.push(name.to_string());
                *state.retry_count.entry(name.to_string()).or_insert(0) += 1;
                state.pending_failure = Some(name.to_string());
            }
            EventKind::MarkerRecorded { name, details } => {
                if name == RESUME_FROM_STEP {
                    state.pending_resume = details.get("step").and_then(Value::as_str).map(|step| ResumeRequest {
                        marker_event_id: event.event_id,
                        step: step.to_string(),
                    });
                } else if name == RESUME_COMPLETED {
                    // clears only the request it names
                    let acked = details.get(RESUME_EVENT_ID_FIELD).and_then(Value::as_u64);
                    if state.pending_resume.as_ref().map(|r| r.marker_event_id) == acked {
                        state.pending_resume = None;
                    }
                }
                state.markers.insert(name.clone(), details.clone());
            }
            _ => {}
        }
    }

    Ok(state)
}
