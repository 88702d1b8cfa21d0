//! Decision engine.
//!
//! [`decide`] maps a [`WorkflowState`] to the next decisions. Rules are tried
//! in a fixed order and the first one that applies produces the whole
//! decision list:
//!
//! 1. pending failure: retry, or start rollback once the retry budget is spent
//! 2. rollback in progress: `RollbackStep`, then `CompensateTransaction`, then fail
//! 3. unacknowledged resume marker: reschedule the named step
//! 4. next step of the sequence that has not completed
//! 5. every step completed: complete the execution
//!
//! The engine reads only its arguments. Activity ids are derived from the
//! history position, so deciding twice on the same state yields identical
//! decisions.

use super::limits::MAX_RETRIES;
use super::state::{HistoryError, WorkflowState, reconstruct};
use crate::{
    ActivityTimeouts, COMPENSATE_TRANSACTION, DEFAULT_STEPS, Decision, Event, RESUME_COMPLETED, RESUME_EVENT_ID_FIELD,
    ROLLBACK_INITIATED, ROLLBACK_STEP,
};
use serde_json::{Map, Value, json};

/// Reason recorded in the `ROLLBACK_INITIATED` marker.
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";
/// Terminal failure reason after a successful compensation.
pub const FAILED_AND_COMPENSATED: &str = "workflow failed and compensated";
/// Terminal failure reason when a rollback activity itself ran out of retries.
pub const COMPENSATION_FAILED: &str = "compensation failed";

/// Static description of the workflow the engine drives.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowPolicy {
    /// Business steps, run in this order.
    pub steps: Vec<String>,
    /// Retries granted per activity before rollback.
    pub max_retries: u32,
    /// Timeouts attached to every schedule decision.
    pub timeouts: ActivityTimeouts,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS.iter().map(|s| s.to_string()).collect(),
            max_retries: MAX_RETRIES,
            timeouts: ActivityTimeouts::default(),
        }
    }
}

impl WorkflowPolicy {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::default().with_steps(steps)
    }

    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeouts(mut self, timeouts: ActivityTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.steps.iter().any(|s| s == name)
    }
}

/// Reconstruct state from `history` and decide.
///
/// A structurally broken history aborts the cycle with the [`HistoryError`];
/// no decisions are produced for it.
pub fn run_decision_cycle(history: &[Event], policy: &WorkflowPolicy) -> Result<Vec<Decision>, HistoryError> {
    let state = reconstruct(history)?;
    Ok(decide(&state, policy))
}

/// Compute the next decisions for `state`. Always returns at least one.
pub fn decide(state: &WorkflowState, policy: &WorkflowPolicy) -> Vec<Decision> {
    let engine = Engine { state, policy };
    engine
        .on_failure()
        .or_else(|| engine.on_rollback())
        .or_else(|| engine.on_resume())
        .unwrap_or_else(|| engine.progress())
}

struct Engine<'a> {
    state: &'a WorkflowState,
    policy: &'a WorkflowPolicy,
}

impl Engine<'_> {
    fn on_failure(&self) -> Option<Vec<Decision>> {
        let failed = self.state.pending_failure.as_deref()?;
        let rollback = self.state.marker(ROLLBACK_INITIATED);

        // the activity that triggered the rollback is not retried again
        if rollback.and_then(|d| d.get("failedActivity")).and_then(Value::as_str) == Some(failed) {
            return None;
        }

        if self.state.retries(failed) <= self.policy.max_retries {
            let original = self
                .state
                .scheduled_inputs
                .get(failed)
                .cloned()
                .unwrap_or_else(|| self.state.input.clone());
            return Some(vec![self.schedule(failed, original)]);
        }

        if let Some(details) = rollback {
            return Some(vec![Decision::FailExecution {
                reason: COMPENSATION_FAILED.to_string(),
                details: json!({
                    "failedActivity": failed,
                    "rollback": details,
                }),
            }]);
        }

        Some(vec![
            Decision::RecordMarker {
                name: ROLLBACK_INITIATED.to_string(),
                details: json!({
                    "failedActivity": failed,
                    "reason": MAX_RETRIES_EXCEEDED,
                }),
            },
            self.rollback_step(failed),
        ])
    }

    fn on_rollback(&self) -> Option<Vec<Decision>> {
        let details = self.state.marker(ROLLBACK_INITIATED)?;

        if self.state.is_completed(COMPENSATE_TRANSACTION) {
            return Some(vec![Decision::FailExecution {
                reason: FAILED_AND_COMPENSATED.to_string(),
                details: details.clone(),
            }]);
        }
        if self.state.is_completed(ROLLBACK_STEP) {
            return Some(vec![self.schedule(COMPENSATE_TRANSACTION, self.state.input.clone())]);
        }

        // rollback scheduled but not finished; the broker timed it out or
        // redelivered the task, so drive it again
        let failed = details.get("failedActivity").and_then(Value::as_str).unwrap_or_default();
        Some(vec![self.rollback_step(failed)])
    }

    fn on_resume(&self) -> Option<Vec<Decision>> {
        let request = self.state.pending_resume.as_ref()?;
        if !self.policy.has_step(&request.step) {
            return None;
        }
        Some(vec![
            self.schedule(&request.step, self.state.input.clone()),
            Decision::RecordMarker {
                name: RESUME_COMPLETED.to_string(),
                details: json!({
                    "resumedStep": request.step,
                    RESUME_EVENT_ID_FIELD: request.marker_event_id,
                }),
            },
        ])
    }

    fn progress(&self) -> Vec<Decision> {
        match self.policy.steps.iter().find(|step| !self.state.is_completed(step)) {
            Some(step) => vec![self.schedule(step, self.state.input.clone())],
            None => vec![Decision::CompleteExecution {
                result: json!({
                    "status": "completed",
                    "results": self.previous_results(),
                }),
            }],
        }
    }

    fn rollback_step(&self, failed: &str) -> Decision {
        self.schedule(
            ROLLBACK_STEP,
            json!({
                "stepToRollback": failed,
                "input": self.state.input,
            }),
        )
    }

    fn schedule(&self, name: &str, input: Value) -> Decision {
        let input = match input {
            Value::Object(mut fields) => {
                fields.insert("previousResults".to_string(), self.previous_results());
                Value::Object(fields)
            }
            Value::Null => json!({ "previousResults": self.previous_results() }),
            other => json!({ "input": other, "previousResults": self.previous_results() }),
        };
        Decision::ScheduleActivity {
            activity_id: format!("{name}-{}", self.state.last_event_id + 1),
            name: name.to_string(),
            input,
            timeouts: self.policy.timeouts,
        }
    }

    fn previous_results(&self) -> Value {
        Value::Object(
            self.state
                .results
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        )
    }
}

#[cfg(test)]
#[path = "decider_tests.rs"]
mod decider_tests;
