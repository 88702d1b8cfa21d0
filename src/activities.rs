//! Business activities of the order workflow.
//!
//! Each handler reads the fields it needs from its JSON input and returns a
//! `status` tag plus echoed or derived fields. Handlers may be redelivered by
//! the broker, so none of them has effects that break on a second run.

use crate::runtime::registry::{ActivityError, ActivityRegistry, ActivityRegistryBuilder};
use crate::{COMPENSATE_TRANSACTION, ROLLBACK_STEP};
use serde_json::{Value, json};
use std::time::Duration;

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn order_id(input: &Value) -> Value {
    input.get("order_id").cloned().unwrap_or(Value::Null)
}

/// `ValidateInput`: requires a non-empty `order_id`.
pub fn validate_input(input: &Value) -> Result<Value, ActivityError> {
    let order_id = match input.get("order_id") {
        None | Some(Value::Null) => return Err(ActivityError::MissingField("order_id".to_string())),
        Some(Value::String(s)) if s.is_empty() => return Err(ActivityError::MissingField("order_id".to_string())),
        Some(v) => v.clone(),
    };
    Ok(json!({
        "status": "validated",
        "order_id": order_id,
        "validatedAt": now(),
    }))
}

/// `ProcessData`: echoes the order's `items`.
pub fn process_data(input: &Value) -> Result<Value, ActivityError> {
    let items = match input.get("items") {
        None | Some(Value::Null) => json!([]),
        Some(Value::Array(items)) => Value::Array(items.clone()),
        Some(other) => {
            return Err(ActivityError::InvalidInput(format!("items must be an array, got {other}")));
        }
    };
    Ok(json!({
        "status": "processed",
        "order_id": order_id(input),
        "processedItems": items,
        "processedAt": now(),
    }))
}

/// `EnrichData`: attaches customer data.
pub fn enrich_data(input: &Value) -> Result<Value, ActivityError> {
    Ok(json!({
        "status": "enriched",
        "order_id": order_id(input),
        "enrichedData": {
            "customerTier": "premium",
            "discountApplied": true,
        },
        "enrichedAt": now(),
    }))
}

/// `SaveResults`: the record id is derived from the order so a redelivered
/// save lands on the same record.
pub fn save_results(input: &Value) -> Result<Value, ActivityError> {
    let order_id = order_id(input);
    let record_id = match &order_id {
        Value::String(s) => format!("REC-{s}"),
        Value::Null => "REC-unknown".to_string(),
        other => format!("REC-{other}"),
    };
    Ok(json!({
        "status": "saved",
        "order_id": order_id,
        "recordId": record_id,
        "savedAt": now(),
    }))
}

/// `NotifyCompletion`.
pub fn notify_completion(input: &Value) -> Result<Value, ActivityError> {
    Ok(json!({
        "status": "notified",
        "order_id": order_id(input),
        "notificationSent": true,
        "notifiedAt": now(),
    }))
}

/// `RollbackStep`: undoes `stepToRollback`.
pub fn rollback_step(input: &Value) -> Result<Value, ActivityError> {
    let step = input
        .get("stepToRollback")
        .and_then(Value::as_str)
        .ok_or_else(|| ActivityError::MissingField("stepToRollback".to_string()))?;
    Ok(json!({
        "status": "rolled_back",
        "rolledBackStep": step,
        "rolledBackAt": now(),
    }))
}

/// `CompensateTransaction`.
pub fn compensate_transaction(input: &Value) -> Result<Value, ActivityError> {
    Ok(json!({
        "status": "compensated",
        "order_id": order_id(input),
        "compensatedAt": now(),
    }))
}

type HandlerFn = fn(&Value) -> Result<Value, ActivityError>;

const HANDLERS: [(&str, HandlerFn); 7] = [
    ("ValidateInput", validate_input),
    ("ProcessData", process_data),
    ("EnrichData", enrich_data),
    ("SaveResults", save_results),
    ("NotifyCompletion", notify_completion),
    (ROLLBACK_STEP, rollback_step),
    (COMPENSATE_TRANSACTION, compensate_transaction),
];

/// Registration options for the business activities.
#[derive(Debug, Clone, Default)]
pub struct BusinessActivities {
    latency: Duration,
}

impl BusinessActivities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated I/O latency applied before every handler runs.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Add all seven handlers to `builder`.
    pub fn register_into(&self, builder: ActivityRegistryBuilder) -> ActivityRegistryBuilder {
        HANDLERS.iter().fold(builder, |builder, &(name, handler)| {
            let latency = self.latency;
            builder.register(name, move |input: Value| async move {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                handler(&input)
            })
        })
    }

    pub fn registry(&self) -> ActivityRegistry {
        self.register_into(ActivityRegistry::builder()).build()
    }
}

/// Registry with every business activity and no simulated latency.
pub fn business_registry() -> ActivityRegistry {
    BusinessActivities::new().registry()
}
