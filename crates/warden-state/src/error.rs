//! Error taxonomy for the Warden control plane.
//!
//! Components never catch errors except to downgrade `RaceLost` into a
//! retry or to convert an expected absence into `None`. Everything else
//! bubbles to the request dispatcher, which logs with context and maps the
//! variant to a response status.

use thiserror::Error;

/// Result type alias used across the workspace.
pub type WardenResult<T> = Result<T, WardenError>;

/// Errors that can occur anywhere in the control plane core.
#[derive(Debug, Error)]
pub enum WardenError {
    /// A required setting is absent. Fatal for the request (500).
    #[error("required setting missing: {0}")]
    ConfigurationMissing(String),

    /// VM identity check failed. Non-retryable (403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A conditional write collided with a concurrent writer. Non-fatal;
    /// the caller re-reads and retries per component.
    #[error("conditional write lost: {0}")]
    RaceLost(String),

    /// Adapter-reported retryable I/O failure.
    #[error("transient platform error: {0}")]
    TransientIo(String),

    /// The license pool has no assignable entry left.
    #[error("no license available")]
    LicenseExhausted,

    /// A bounded election waiter ran out of execution time.
    #[error("election wait expired: {0}")]
    ElectionTimeout(String),

    /// Primary finalization failed; the lifecycle hook was completed with
    /// abandon.
    #[error("lifecycle action abandoned: {0}")]
    LifecycleAbandon(String),

    /// Store-level failure (open, transaction, table, read, write).
    #[error("store error: {0}")]
    Store(String),

    /// JSON (de)serialization failure on a persisted record.
    #[error("serialization error: {0}")]
    Serialize(String),
}

impl WardenError {
    /// Whether the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WardenError::RaceLost(_) | WardenError::TransientIo(_))
    }
}
