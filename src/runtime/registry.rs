//! Activity capability registry.
//!
//! Maps activity names to handlers. The set is fixed when the registry is
//! built at process start; lookups afterwards are lock-free reads of an
//! immutable map.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Failure of a single activity invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityError {
    /// No handler is registered under this name.
    UnknownActivity(String),
    /// A required input field is absent or empty.
    MissingField(String),
    /// The input could not be interpreted.
    InvalidInput(String),
    /// The handler ran and reported a business failure.
    Failed(String),
}

impl ActivityError {
    pub fn failed(message: impl Into<String>) -> Self {
        ActivityError::Failed(message.into())
    }

    /// Short machine-friendly tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ActivityError::UnknownActivity(_) => "unknown_activity",
            ActivityError::MissingField(_) => "missing_field",
            ActivityError::InvalidInput(_) => "invalid_input",
            ActivityError::Failed(_) => "handler_error",
        }
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityError::UnknownActivity(name) => write!(f, "unknown activity type: {name}"),
            ActivityError::MissingField(field) => write!(f, "missing {field} in input"),
            ActivityError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            ActivityError::Failed(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for ActivityError {}

/// Trait implemented by activity handlers that can be invoked by the dispatcher.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn invoke(&self, input: Value) -> Result<Value, ActivityError>;
}

/// Function wrapper that implements `ActivityHandler`.
pub struct FnActivity<F, Fut>(pub F)
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value, ActivityError>> + Send + 'static;

#[async_trait]
impl<F, Fut> ActivityHandler for FnActivity<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value, ActivityError>> + Send + 'static,
{
    async fn invoke(&self, input: Value) -> Result<Value, ActivityError> {
        (self.0)(input).await
    }
}

/// Immutable registry mapping activity names to handlers.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    inner: Arc<HashMap<String, Arc<dyn ActivityHandler>>>,
}

impl ActivityRegistry {
    pub fn builder() -> ActivityRegistryBuilder {
        ActivityRegistryBuilder {
            map: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Start a builder pre-populated with this registry's handlers.
    pub fn builder_from(reg: &ActivityRegistry) -> ActivityRegistryBuilder {
        ActivityRegistryBuilder {
            map: reg.inner.as_ref().clone(),
            errors: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActivityHandler>> {
        let handler = self.inner.get(name).cloned();
        if handler.is_none() {
            tracing::debug!(
                target: "sagaflow::runtime::registry",
                requested_name = %name,
                registered_names = ?self.list_names(),
                "Registry lookup miss"
            );
        }
        handler
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.inner.len()
    }
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistry").field("names", &self.list_names()).finish()
    }
}

/// Builder for [`ActivityRegistry`].
pub struct ActivityRegistryBuilder {
    map: HashMap<String, Arc<dyn ActivityHandler>>,
    errors: Vec<String>,
}

impl ActivityRegistryBuilder {
    /// Register an async closure as an activity.
    pub fn register<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, ActivityError>> + Send + 'static,
    {
        self.register_handler(name, Arc::new(FnActivity(f)))
    }

    /// Register a prebuilt handler.
    pub fn register_handler(mut self, name: impl Into<String>, handler: Arc<dyn ActivityHandler>) -> Self {
        let name = name.into();
        if self.map.contains_key(&name) {
            self.errors.push(format!("duplicate activity registration: {name}"));
            return self;
        }
        self.map.insert(name, handler);
        self
    }

    /// Finalize, keeping the first handler registered under a duplicated name.
    pub fn build(self) -> ActivityRegistry {
        ActivityRegistry {
            inner: Arc::new(self.map),
        }
    }

    /// Build the registry, returning an error if there were any registration errors.
    ///
    /// # Errors
    ///
    /// Returns all registration errors joined with `"; "`.
    pub fn build_result(self) -> Result<ActivityRegistry, String> {
        if self.errors.is_empty() {
            Ok(self.build())
        } else {
            Err(self.errors.join("; "))
        }
    }
}
