//! Error types for the phase scheduler.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the phase scheduler.
#[derive(Error, Debug)]
pub enum Error {
    /// A timer or interval was requested with a negative delay.
    #[error("Invalid delay: {delay} (timer delays must be >= 0)")]
    NegativeDelay { delay: i64 },

    /// `run()` was called from inside a task that `run()` is executing.
    #[error("Scheduler is already running")]
    ReentrantRun,

    /// The configured task budget ran out before the queues drained.
    #[error("Task budget exhausted after {limit} tasks")]
    TaskBudgetExhausted { limit: u64 },

    /// Worker pool failures (spawn errors, no workers left)
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No scenario registered under this name
    #[error("Unknown scenario: {name}")]
    UnknownScenario { name: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] Box<serde_json::Error>),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a worker pool error.
    pub fn worker_pool(message: impl Into<String>) -> Self {
        Self::WorkerPool(message.into())
    }

    /// Create an unknown-scenario error.
    pub fn unknown_scenario(name: impl Into<String>) -> Self {
        Self::UnknownScenario { name: name.into() }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Box::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(Box::new(value))
    }
}
