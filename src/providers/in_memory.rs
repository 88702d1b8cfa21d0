use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;

use super::{ActivityTask, BrokerError, DecisionTask, TaskBroker};
use crate::runtime::dispatcher::FailureReport;
use crate::{Decision, Event, EventKind, ExecutionStatus, RESUME_FROM_STEP, resume_marker_details};

#[derive(Debug, Default)]
struct ExecutionRecord {
    history: Vec<Event>,
    closed: bool,
    // exclusive delivery: at most one decision task per execution is out
    decision_queued: bool,
    decision_in_flight: bool,
    needs_decision: bool,
}

impl ExecutionRecord {
    fn append(&mut self, kind: EventKind) -> u64 {
        let event_id = self.history.last().map_or(1, |e| e.event_id + 1);
        self.history.push(Event::new(event_id, kind));
        event_id
    }
}

#[derive(Debug)]
struct QueuedActivity {
    execution_id: String,
    scheduled_event_id: u64,
    activity_id: String,
    name: String,
    input: Value,
}

#[derive(Debug, Default)]
struct Inner {
    executions: HashMap<String, ExecutionRecord>,
    decision_q: VecDeque<String>,
    activity_q: VecDeque<QueuedActivity>,
    // peek-lock state: token -> owner. Items here are invisible until answered.
    locked_decisions: HashMap<String, String>,
    locked_activities: HashMap<String, (String, u64)>,
    token_counter: u64,
}

impl Inner {
    fn next_token(&mut self, prefix: &str) -> String {
        self.token_counter += 1;
        format!("{prefix}:{}", self.token_counter)
    }

    fn request_decision(&mut self, execution_id: &str) {
        let Some(rec) = self.executions.get_mut(execution_id) else {
            return;
        };
        if rec.closed {
            return;
        }
        if rec.decision_in_flight {
            rec.needs_decision = true;
        } else if !rec.decision_queued {
            rec.decision_queued = true;
            self.decision_q.push_back(execution_id.to_string());
        }
    }

    fn open_execution(&mut self, operation: &str, execution_id: &str) -> Result<&mut ExecutionRecord, BrokerError> {
        let rec = self
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| BrokerError::permanent(operation, format!("execution not found: {execution_id}")))?;
        if rec.closed {
            return Err(BrokerError::permanent(
                operation,
                format!("execution already closed: {execution_id}"),
            ));
        }
        Ok(rec)
    }
}

/// Single-process broker keeping every execution's history in memory.
///
/// Decision and activity tasks are FIFO queues with peek-lock tokens. No
/// timeouts are enforced: a task that is never answered stays locked.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    inner: Mutex<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an execution with its `ExecutionStarted` event and queue its
    /// first decision task.
    pub async fn start_execution(&self, execution_id: &str, input: Value) -> Result<(), BrokerError> {
        let mut g = self.inner.lock().await;
        if g.executions.contains_key(execution_id) {
            return Err(BrokerError::permanent(
                "start_execution",
                format!("execution already exists: {execution_id}"),
            ));
        }
        let mut rec = ExecutionRecord::default();
        rec.append(EventKind::ExecutionStarted { input });
        g.executions.insert(execution_id.to_string(), rec);
        g.request_decision(execution_id);
        Ok(())
    }

    /// Append an arbitrary event to an open execution and queue a decision
    /// task. Returns the new event id.
    pub async fn append_event(&self, execution_id: &str, kind: EventKind) -> Result<u64, BrokerError> {
        let mut g = self.inner.lock().await;
        let event_id = g.open_execution("append_event", execution_id)?.append(kind);
        g.request_decision(execution_id);
        Ok(event_id)
    }

    /// Record an operator marker on an open execution.
    pub async fn record_marker(&self, execution_id: &str, name: &str, details: Value) -> Result<u64, BrokerError> {
        self.append_event(
            execution_id,
            EventKind::MarkerRecorded {
                name: name.to_string(),
                details,
            },
        )
        .await
    }

    /// Ask the engine to re-run `step` on its next decision cycle.
    pub async fn resume_from_step(&self, execution_id: &str, step: &str) -> Result<u64, BrokerError> {
        self.record_marker(execution_id, RESUME_FROM_STEP, resume_marker_details(step))
            .await
    }

    pub async fn history(&self, execution_id: &str) -> Vec<Event> {
        let g = self.inner.lock().await;
        g.executions
            .get(execution_id)
            .map(|rec| rec.history.clone())
            .unwrap_or_default()
    }

    pub async fn status(&self, execution_id: &str) -> ExecutionStatus {
        ExecutionStatus::from_history(&self.history(execution_id).await)
    }

    pub async fn list_executions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().await.executions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Poll until the execution reaches a terminal status or `timeout` elapses.
    pub async fn wait_for_terminal(&self, execution_id: &str, timeout: Duration) -> Option<ExecutionStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status(execution_id).await;
            if status.is_terminal() {
                return Some(status);
            }
            if Instant::now() > deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Number of queued (not yet delivered) decision and activity tasks.
    pub async fn queue_depths(&self) -> (usize, usize) {
        let g = self.inner.lock().await;
        (g.decision_q.len(), g.activity_q.len())
    }
}

#[async_trait::async_trait]
impl TaskBroker for InMemoryBroker {
    async fn poll_decision_task(&self) -> Result<Option<DecisionTask>, BrokerError> {
        let mut g = self.inner.lock().await;
        while let Some(execution_id) = g.decision_q.pop_front() {
            let Some(rec) = g.executions.get_mut(&execution_id) else {
                continue;
            };
            rec.decision_queued = false;
            if rec.closed {
                continue;
            }
            rec.decision_in_flight = true;
            let history = rec.history.clone();
            let token = g.next_token("d");
            g.locked_decisions.insert(token.clone(), execution_id.clone());
            return Ok(Some(DecisionTask {
                token,
                execution_id,
                history,
            }));
        }
        Ok(None)
    }

    async fn respond_decision_task_completed(&self, token: &str, decisions: Vec<Decision>) -> Result<(), BrokerError> {
        const OP: &str = "respond_decision_task_completed";
        let mut g = self.inner.lock().await;
        let execution_id = g
            .locked_decisions
            .remove(token)
            .ok_or_else(|| BrokerError::permanent(OP, format!("unknown task token: {token}")))?;

        let mut scheduled = Vec::new();
        let rec = g
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| BrokerError::permanent(OP, format!("execution not found: {execution_id}")))?;
        rec.decision_in_flight = false;
        if rec.closed {
            return Err(BrokerError::permanent(OP, format!("execution already closed: {execution_id}")));
        }

        for decision in decisions {
            if rec.closed {
                break;
            }
            match decision {
                Decision::ScheduleActivity {
                    activity_id,
                    name,
                    input,
                    ..
                } => {
                    let scheduled_event_id = rec.append(EventKind::ActivityScheduled {
                        activity_id: activity_id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    });
                    scheduled.push(QueuedActivity {
                        execution_id: execution_id.clone(),
                        scheduled_event_id,
                        activity_id,
                        name,
                        input,
                    });
                }
                Decision::RecordMarker { name, details } => {
                    rec.append(EventKind::MarkerRecorded { name, details });
                }
                Decision::CompleteExecution { result } => {
                    rec.append(EventKind::ExecutionCompleted { result });
                    rec.closed = true;
                }
                Decision::FailExecution { reason, details } => {
                    rec.append(EventKind::ExecutionFailed {
                        reason,
                        details: details.to_string(),
                    });
                    rec.closed = true;
                }
            }
        }

        let redecide = std::mem::take(&mut rec.needs_decision) && !rec.closed;
        g.activity_q.extend(scheduled);
        if redecide {
            g.request_decision(&execution_id);
        }
        Ok(())
    }

    async fn poll_activity_task(&self) -> Result<Option<ActivityTask>, BrokerError> {
        let mut g = self.inner.lock().await;
        while let Some(item) = g.activity_q.pop_front() {
            let open = g.executions.get(&item.execution_id).is_some_and(|rec| !rec.closed);
            if !open {
                continue;
            }
            let token = g.next_token("a");
            g.locked_activities
                .insert(token.clone(), (item.execution_id.clone(), item.scheduled_event_id));
            return Ok(Some(ActivityTask {
                token,
                execution_id: item.execution_id,
                activity_id: item.activity_id,
                activity_name: item.name,
                input: item.input,
            }));
        }
        Ok(None)
    }

    async fn respond_activity_task_completed(&self, token: &str, result: Value) -> Result<(), BrokerError> {
        const OP: &str = "respond_activity_task_completed";
        let mut g = self.inner.lock().await;
        let (execution_id, scheduled_event_id) = g
            .locked_activities
            .remove(token)
            .ok_or_else(|| BrokerError::permanent(OP, format!("unknown task token: {token}")))?;
        g.open_execution(OP, &execution_id)?.append(EventKind::ActivityCompleted {
            scheduled_event_id,
            result,
        });
        g.request_decision(&execution_id);
        Ok(())
    }

    async fn respond_activity_task_failed(&self, token: &str, report: FailureReport) -> Result<(), BrokerError> {
        const OP: &str = "respond_activity_task_failed";
        let mut g = self.inner.lock().await;
        let (execution_id, scheduled_event_id) = g
            .locked_activities
            .remove(token)
            .ok_or_else(|| BrokerError::permanent(OP, format!("unknown task token: {token}")))?;
        g.open_execution(OP, &execution_id)?.append(EventKind::ActivityFailed {
            scheduled_event_id,
            reason: report.reason,
            details: report.details,
        });
        g.request_decision(&execution_id);
        Ok(())
    }
}
