//! Activity dispatcher.
//!
//! Resolves an activity name in the [`ActivityRegistry`], runs the handler and
//! turns the outcome into something the broker accepts. Handler failures,
//! unknown names and panics all become a bounded [`FailureReport`]; nothing
//! escapes to the worker loop.

use super::limits::{MAX_FAILURE_DETAILS_BYTES, MAX_FAILURE_REASON_BYTES, truncate_utf8};
use super::registry::{ActivityError, ActivityRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure text as reported to the broker, within its payload limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub reason: String,
    pub details: String,
}

impl FailureReport {
    /// Build a report for `error` raised by `activity`, truncating reason to
    /// 256 bytes and details to 32 KiB.
    pub fn from_error(activity: &str, error: &ActivityError) -> Self {
        let reason = error.to_string();
        let details = format!("activity {activity} failed ({}): {error}", error.kind());
        Self {
            reason: truncate_utf8(&reason, MAX_FAILURE_REASON_BYTES).to_string(),
            details: truncate_utf8(&details, MAX_FAILURE_DETAILS_BYTES).to_string(),
        }
    }
}

/// Outcome of one activity task.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityOutcome {
    Completed { result: Value },
    Failed(FailureReport),
}

impl ActivityOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActivityOutcome::Completed { .. })
    }
}

/// Runs activities by name against a fixed registry.
///
/// Holds no locks while a handler runs, so handlers may block on I/O and
/// several tasks may execute in parallel.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: ActivityRegistry,
}

impl Dispatcher {
    pub fn new(registry: ActivityRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ActivityRegistry {
        &self.registry
    }

    /// Invoke the handler registered under `name`.
    ///
    /// # Errors
    ///
    /// [`ActivityError::UnknownActivity`] when nothing is registered under
    /// `name`; otherwise whatever the handler returns. A panicking handler is
    /// reported as [`ActivityError::Failed`].
    pub async fn dispatch(&self, name: &str, input: Value) -> Result<Value, ActivityError> {
        let handler = self
            .registry
            .get(name)
            .ok_or_else(|| ActivityError::UnknownActivity(name.to_string()))?;

        match tokio::spawn(async move { handler.invoke(input).await }).await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => Err(ActivityError::Failed(format!("activity {name} panicked"))),
            Err(join_err) => Err(ActivityError::Failed(format!("activity {name} was cancelled: {join_err}"))),
        }
    }

    /// Dispatch and convert the result into a broker-ready outcome.
    pub async fn execute(&self, name: &str, input: Value) -> ActivityOutcome {
        let start = std::time::Instant::now();
        match self.dispatch(name, input).await {
            Ok(result) => {
                tracing::debug!(
                    target: "sagaflow::runtime::dispatcher",
                    activity_name = %name,
                    outcome = "success",
                    duration_ms = %start.elapsed().as_millis(),
                    "Activity completed"
                );
                ActivityOutcome::Completed { result }
            }
            Err(error) => {
                match &error {
                    ActivityError::UnknownActivity(_) => tracing::error!(
                        target: "sagaflow::runtime::dispatcher",
                        activity_name = %name,
                        outcome = "system_error",
                        error_type = "unregistered",
                        "Activity failed (unregistered)"
                    ),
                    _ => tracing::warn!(
                        target: "sagaflow::runtime::dispatcher",
                        activity_name = %name,
                        outcome = "app_error",
                        error_type = error.kind(),
                        duration_ms = %start.elapsed().as_millis(),
                        error = %error,
                        "Activity failed (application error)"
                    ),
                }
                ActivityOutcome::Failed(FailureReport::from_error(name, &error))
            }
        }
    }
}
