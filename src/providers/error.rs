/// Broker-specific error with retry classification
///
/// Brokers return this error type to indicate whether an operation should be
/// retried. The runtime logs the error and, for retryable errors, simply polls
/// again on the next loop iteration.
///
/// **Retryable**: transport failures, throttling, temporary unavailability.
///
/// **Non-retryable**: unknown task token, execution already closed, invalid
/// decisions.
///
/// ```rust
/// use sagaflow::providers::BrokerError;
///
/// let err = BrokerError::permanent("respond_decision_task_completed", "execution already closed");
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerError {
    /// Operation that failed (e.g. "poll_activity_task")
    pub operation: String,
    /// Human-readable error message
    pub message: String,
    /// Whether this error should be retried
    pub retryable: bool,
}

impl BrokerError {
    /// Create a retryable (transient) error
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable (permanent) error
    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

impl std::error::Error for BrokerError {}
