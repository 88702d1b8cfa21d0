//! Engine, dispatcher and the worker loops that connect them to a broker.
//!
//! The decision engine ([`decider`]) and state reconstruction ([`state`]) are
//! pure and synchronous. [`Runtime`] is the thin async layer that polls a
//! [`TaskBroker`] for work, runs a decision or activity cycle, and answers.

use crate::providers::{ActivityTask, BrokerError, DecisionTask, TaskBroker};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub mod decider;
pub mod dispatcher;
pub mod limits;
pub mod observability;
pub mod registry;
pub mod state;

use decider::{WorkflowPolicy, run_decision_cycle};
use dispatcher::{ActivityOutcome, Dispatcher};
use observability::{RuntimeStats, StatsSnapshot};
use registry::ActivityRegistry;
use state::HistoryError;

/// Configuration options for the Runtime.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Sleep between polls when a queue is empty.
    /// Default: 10ms
    pub dispatcher_idle_sleep: Duration,
    /// Number of concurrent activity workers.
    /// Default: 2
    pub activity_concurrency: usize,
    /// Prefix of the worker ids reported in logs.
    pub worker_identity: String,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            dispatcher_idle_sleep: Duration::from_millis(10),
            activity_concurrency: 2,
            worker_identity: "sagaflow".to_string(),
        }
    }
}

/// Error surfaced by a single decision or activity cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// The broker rejected or failed an operation.
    Broker(BrokerError),
    /// The execution's history cannot be reconstructed. The cycle was aborted
    /// without answering; retrying the same history cannot succeed.
    History { execution_id: String, source: HistoryError },
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::Broker(e) => write!(f, "broker error: {e}"),
            RuntimeError::History { execution_id, source } => {
                write!(f, "structural history error in execution {execution_id}: {source}")
            }
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuntimeError::Broker(e) => Some(e),
            RuntimeError::History { source, .. } => Some(source),
        }
    }
}

impl From<BrokerError> for RuntimeError {
    fn from(e: BrokerError) -> Self {
        RuntimeError::Broker(e)
    }
}

/// In-process runtime running one decision dispatcher and a pool of activity
/// workers against a [`TaskBroker`].
pub struct Runtime {
    broker: Arc<dyn TaskBroker>,
    dispatcher: Dispatcher,
    policy: WorkflowPolicy,
    options: RuntimeOptions,
    stats: RuntimeStats,
    shutdown_flag: Arc<AtomicBool>,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    /// Build a runtime without spawning any background work. Use
    /// [`Runtime::process_decision_task`] and [`Runtime::process_activity_task`]
    /// to drive it by hand.
    pub fn new(
        broker: Arc<dyn TaskBroker>,
        registry: ActivityRegistry,
        policy: WorkflowPolicy,
        options: RuntimeOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker,
            dispatcher: Dispatcher::new(registry),
            policy,
            options,
            stats: RuntimeStats::default(),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            joins: Mutex::new(Vec::new()),
        })
    }

    /// Build a runtime and start its background dispatchers.
    pub async fn start(
        broker: Arc<dyn TaskBroker>,
        registry: ActivityRegistry,
        policy: WorkflowPolicy,
        options: RuntimeOptions,
    ) -> Arc<Self> {
        let runtime = Self::new(broker, registry, policy, options);

        let handle = runtime.clone().start_decision_dispatcher();
        runtime.joins.lock().await.push(handle);

        for worker_idx in 0..runtime.options.activity_concurrency.max(1) {
            let handle = runtime.clone().start_activity_worker(worker_idx);
            runtime.joins.lock().await.push(handle);
        }

        info!(
            target: "sagaflow::runtime",
            steps = ?runtime.policy.steps,
            max_retries = runtime.policy.max_retries,
            activity_workers = runtime.options.activity_concurrency.max(1),
            registered_activities = ?runtime.dispatcher.registry().list_names(),
            "Runtime started"
        );
        runtime
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Poll and handle one decision task. Returns `Ok(false)` when none was
    /// available.
    pub async fn process_decision_task(&self) -> Result<bool, RuntimeError> {
        self.decision_cycle("manual").await
    }

    /// Poll and handle one activity task. Returns `Ok(false)` when none was
    /// available.
    pub async fn process_activity_task(&self) -> Result<bool, RuntimeError> {
        self.activity_cycle("manual").await
    }

    /// Stop background dispatchers. In-flight handlers are aborted; their
    /// tasks are redelivered by the broker.
    pub async fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
        let mut joins = self.joins.lock().await;
        for j in joins.drain(..) {
            j.abort();
        }
        debug!(target: "sagaflow::runtime", "Runtime shut down");
    }

    async fn decision_cycle(&self, worker_id: &str) -> Result<bool, RuntimeError> {
        let Some(task) = self.broker.poll_decision_task().await? else {
            return Ok(false);
        };
        self.handle_decision_task(task, worker_id).await?;
        Ok(true)
    }

    async fn handle_decision_task(&self, task: DecisionTask, worker_id: &str) -> Result<(), RuntimeError> {
        let DecisionTask {
            token,
            execution_id,
            history,
        } = task;

        let decisions = match run_decision_cycle(&history, &self.policy) {
            Ok(decisions) => decisions,
            Err(source) => {
                self.stats.record_structural_error();
                error!(
                    target: "sagaflow::runtime",
                    execution_id = %execution_id,
                    worker_id = %worker_id,
                    history_len = history.len(),
                    error = %source,
                    "Structural history error; decision task left unanswered"
                );
                return Err(RuntimeError::History { execution_id, source });
            }
        };
        self.stats.record_decision_cycle();

        let kinds: Vec<&str> = decisions.iter().map(|d| d.kind()).collect();
        info!(
            target: "sagaflow::runtime",
            execution_id = %execution_id,
            worker_id = %worker_id,
            history_len = history.len(),
            last_event = history.last().map_or("none", |e| e.kind.type_name()),
            decision_count = decisions.len(),
            decisions = ?kinds,
            "Decision cycle completed"
        );
        self.broker.respond_decision_task_completed(&token, decisions).await?;
        Ok(())
    }

    async fn activity_cycle(&self, worker_id: &str) -> Result<bool, RuntimeError> {
        let Some(task) = self.broker.poll_activity_task().await? else {
            return Ok(false);
        };
        self.handle_activity_task(task, worker_id).await?;
        Ok(true)
    }

    async fn handle_activity_task(&self, task: ActivityTask, worker_id: &str) -> Result<(), RuntimeError> {
        let ActivityTask {
            token,
            execution_id,
            activity_id,
            activity_name,
            input,
        } = task;

        debug!(
            target: "sagaflow::runtime",
            execution_id = %execution_id,
            activity_name = %activity_name,
            activity_id = %activity_id,
            worker_id = %worker_id,
            "Activity started"
        );

        match self.dispatcher.execute(&activity_name, input).await {
            ActivityOutcome::Completed { result } => {
                self.stats.record_activity_success();
                self.broker.respond_activity_task_completed(&token, result).await?;
            }
            ActivityOutcome::Failed(report) => {
                let unknown = !self.dispatcher.registry().has(&activity_name);
                self.stats.record_activity_failure(unknown);
                warn!(
                    target: "sagaflow::runtime",
                    execution_id = %execution_id,
                    activity_name = %activity_name,
                    activity_id = %activity_id,
                    worker_id = %worker_id,
                    reason = %report.reason,
                    "Reporting activity failure"
                );
                self.broker.respond_activity_task_failed(&token, report).await?;
            }
        }
        Ok(())
    }

    fn start_decision_dispatcher(self: Arc<Self>) -> JoinHandle<()> {
        let worker_id = format!("{}-decider", self.options.worker_identity);
        tokio::spawn(async move {
            while !self.shutdown_flag.load(Ordering::Relaxed) {
                match self.decision_cycle(&worker_id).await {
                    Ok(true) => {}
                    Ok(false) => tokio::time::sleep(self.options.dispatcher_idle_sleep).await,
                    Err(e) => {
                        if let RuntimeError::Broker(b) = &e {
                            warn!(target: "sagaflow::runtime", worker_id = %worker_id, error = %b, retryable = b.is_retryable(), "Decision cycle failed");
                        }
                        tokio::time::sleep(self.options.dispatcher_idle_sleep).await;
                    }
                }
            }
        })
    }

    fn start_activity_worker(self: Arc<Self>, worker_idx: usize) -> JoinHandle<()> {
        let worker_id = format!("{}-activity-{worker_idx}", self.options.worker_identity);
        tokio::spawn(async move {
            while !self.shutdown_flag.load(Ordering::Relaxed) {
                match self.activity_cycle(&worker_id).await {
                    Ok(true) => {}
                    Ok(false) => tokio::time::sleep(self.options.dispatcher_idle_sleep).await,
                    Err(e) => {
                        warn!(target: "sagaflow::runtime", worker_id = %worker_id, error = %e, "Activity cycle failed");
                        tokio::time::sleep(self.options.dispatcher_idle_sleep).await;
                    }
                }
            }
        })
    }
}

