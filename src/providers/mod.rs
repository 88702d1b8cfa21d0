//! Task broker boundary.
//!
//! The broker durably stores each execution's history, hands out decision and
//! activity tasks, and enforces timeouts. The engine only sees the tasks it
//! delivers and answers them; it never touches the broker's storage.

use crate::runtime::dispatcher::FailureReport;
use crate::{Decision, Event};
use serde_json::Value;

mod error;
pub use error::BrokerError;

/// In-memory broker for tests and the demo binary.
pub mod in_memory;

/// A request to decide the next step of one execution.
#[derive(Debug, Clone)]
pub struct DecisionTask {
    /// Opaque token used to answer this task.
    pub token: String,
    pub execution_id: String,
    /// Full history of the execution, ordered by event id.
    pub history: Vec<Event>,
}

/// A request to run one activity.
#[derive(Debug, Clone)]
pub struct ActivityTask {
    /// Opaque token used to answer this task.
    pub token: String,
    pub execution_id: String,
    pub activity_id: String,
    pub activity_name: String,
    pub input: Value,
}

/// Operations the runtime needs from a task broker.
///
/// Polls return `Ok(None)` when no task is available. Each task must be
/// answered at most once; an unanswered task is redelivered by the broker
/// after its timeout.
#[async_trait::async_trait]
pub trait TaskBroker: Send + Sync {
    async fn poll_decision_task(&self) -> Result<Option<DecisionTask>, BrokerError>;

    async fn respond_decision_task_completed(&self, token: &str, decisions: Vec<Decision>) -> Result<(), BrokerError>;

    async fn poll_activity_task(&self) -> Result<Option<ActivityTask>, BrokerError>;

    async fn respond_activity_task_completed(&self, token: &str, result: Value) -> Result<(), BrokerError>;

    async fn respond_activity_task_failed(&self, token: &str, report: FailureReport) -> Result<(), BrokerError>;
}
