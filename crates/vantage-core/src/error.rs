//! Error taxonomy shared across the pipeline.
//!
//! Each variant maps to a distinct recovery strategy:
//! - `Computation` degrades to "not computable" inside a detector run
//! - `Transition` is rejected and surfaced to the caller
//! - `External` is retried per policy, then surfaced as a failed record
//! - `Validation` feeds the rollback decision
//! - duplicate writes are resolved inside the store upsert and never
//!   surface as an error at all

use thiserror::Error;

/// Result type alias used throughout vantage.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or insufficient data for a statistical test.
    #[error("computation error: {0}")]
    Computation(String),

    /// Illegal workflow state change.
    #[error("transition error: {0}")]
    Transition(String),

    /// Network/timeout failure talking to an external system.
    #[error("external call failure: {0}")]
    External(String),

    /// Post-execution state did not match declared post-conditions.
    #[error("validation failure: {0}")]
    Validation(String),

    /// Storage layer failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a computation error
    pub fn computation(msg: impl Into<String>) -> Self {
        Self::Computation(msg.into())
    }

    /// Create a transition error
    pub fn transition(msg: impl Into<String>) -> Self {
        Self::Transition(msg.into())
    }

    /// Create an external call failure
    pub fn external(msg: impl Into<String>) -> Self {
        Self::External(msg.into())
    }

    /// Create a validation failure
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// True if the failure is worth retrying under the backoff policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::External(_) | Error::Storage(_))
    }
}
