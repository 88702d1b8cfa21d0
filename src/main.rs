//! Runs two order executions end to end against the in-memory broker: one
//! that completes and one whose validation keeps failing and gets compensated.

use sagaflow::activities::BusinessActivities;
use sagaflow::providers::TaskBroker;
use sagaflow::providers::in_memory::InMemoryBroker;
use sagaflow::runtime::observability::{LogFormat, LoggingConfig, init_logging};
use sagaflow::runtime::{Runtime, RuntimeOptions};
use sagaflow::{ExecutionStatus, WorkflowPolicy};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_format = match std::env::var("SAGAFLOW_LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        Ok("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    };
    init_logging(&LoggingConfig {
        log_format,
        ..Default::default()
    })
    .map_err(anyhow::Error::msg)?;

    let broker = Arc::new(InMemoryBroker::new());
    let registry = BusinessActivities::new()
        .with_latency(Duration::from_millis(20))
        .registry();
    let runtime = Runtime::start(
        broker.clone() as Arc<dyn TaskBroker>,
        registry,
        WorkflowPolicy::default(),
        RuntimeOptions::default(),
    )
    .await;

    broker
        .start_execution("order-1001", json!({"order_id": "1001", "items": ["widget", "gadget"]}))
        .await?;
    broker.start_execution("order-missing-id", json!({"items": []})).await?;

    for execution_id in ["order-1001", "order-missing-id"] {
        let status = broker
            .wait_for_terminal(execution_id, Duration::from_secs(10))
            .await
            .ok_or_else(|| anyhow::anyhow!("execution {execution_id} did not finish in time"))?;
        match status {
            ExecutionStatus::Completed { result } => {
                println!("{execution_id}: completed\n{}", serde_json::to_string_pretty(&result)?);
            }
            ExecutionStatus::Failed { reason, details } => {
                println!("{execution_id}: failed ({reason})\n{details}");
            }
            other => println!("{execution_id}: {other:?}"),
        }
        println!("{execution_id}: {} history events", broker.history(execution_id).await.len());
    }

    println!("stats: {:?}", runtime.stats());
    runtime.shutdown().await;
    Ok(())
}
