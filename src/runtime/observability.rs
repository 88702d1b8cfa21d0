//! Structured logging setup and runtime counters.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log format options for structured logging
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Structured JSON output for log aggregators
    Json,
    /// Human-readable format for development (with all fields)
    Pretty,
    /// Compact format: timestamp level target message fields
    #[default]
    Compact,
}

/// Logging configuration.
///
/// `RUST_LOG`, when set, takes precedence over `log_level`.
///
/// ```rust,no_run
/// # use sagaflow::runtime::observability::{LoggingConfig, LogFormat, init_logging};
/// let config = LoggingConfig {
///     log_format: LogFormat::Json,
///     ..Default::default()
/// };
/// init_logging(&config).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_format: LogFormat,
    /// Level applied to `sagaflow` targets (e.g. "info", "debug").
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Compact,
            log_level: "info".to_string(),
        }
    }
}

fn default_filter_expression(level: &str) -> String {
    format!("warn,sagaflow={level}")
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), String> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter_expression(&config.log_level)));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| format!("Failed to initialize JSON logging: {e}")),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| format!("Failed to initialize pretty logging: {e}")),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .map_err(|e| format!("Failed to initialize compact logging: {e}")),
    }
}

/// Snapshot of runtime counters for tests and diagnostics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub decision_cycles: u64,
    pub structural_errors: u64,
    pub activity_success: u64,
    pub activity_failures: u64,
    pub unknown_activities: u64,
}

/// Counters updated by the runtime's dispatchers.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    decision_cycles: AtomicU64,
    structural_errors: AtomicU64,
    activity_success: AtomicU64,
    activity_failures: AtomicU64,
    unknown_activities: AtomicU64,
}

impl RuntimeStats {
    pub fn record_decision_cycle(&self) {
        self.decision_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_structural_error(&self) {
        self.structural_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_activity_success(&self) {
        self.activity_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_activity_failure(&self, unknown: bool) {
        self.activity_failures.fetch_add(1, Ordering::Relaxed);
        if unknown {
            self.unknown_activities.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            decision_cycles: self.decision_cycles.load(Ordering::Relaxed),
            structural_errors: self.structural_errors.load(Ordering::Relaxed),
            activity_success: self.activity_success.load(Ordering::Relaxed),
            activity_failures: self.activity_failures.load(Ordering::Relaxed),
            unknown_activities: self.unknown_activities.load(Ordering::Relaxed),
        }
    }
}
