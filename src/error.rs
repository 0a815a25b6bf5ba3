use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Invalid payload for job type '{job_type}': {reason}")]
    Validation { job_type: String, reason: String },

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Broker unavailable")]
    BrokerUnavailable,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid lease token")]
    InvalidLeaseToken,

    #[error("Lease has expired")]
    LeaseExpired,

    #[error("Job is already in terminal state")]
    JobAlreadyTerminal,

    #[error("Job is active and cannot be removed: {0}")]
    JobActive(String),

    #[error("Handler already registered for job type: {0}")]
    DuplicateHandler(String),

    #[error("Job execution failed: {0}")]
    JobFailed(#[from] HandlerError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Handler execution outcome - determines retry behavior
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    /// Retryable error - will schedule retry if attempts remain
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error - fail immediately, no retry
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl HandlerError {
    /// Create a retryable error
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
