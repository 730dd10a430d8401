//! Error types for agent-core

use std::time::Duration;
use thiserror::Error;

/// Result type alias for agent-core
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for stage and orchestration operations
#[derive(Error, Debug)]
pub enum Error {
    /// Stage processing failed
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// Required input missing or empty
    #[error("{0}")]
    Validation(String),

    /// A stage did not finish within its time budget
    #[error("{stage} stage timed out after {}ms", after.as_millis())]
    Timeout {
        stage: String,
        after: Duration,
    },

    /// The caller cancelled the run
    #[error("{0} cancelled")]
    Cancelled(String),
}
