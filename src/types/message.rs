use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;

use super::JobPriority;

/// Job message - immutable submission data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    /// Target queue name
    pub queue: String,

    /// Job type identifier for dispatch
    pub job_type: String,

    /// Serialized job payload (JSON bytes, typed at the registry boundary)
    pub payload: Vec<u8>,

    /// Job priority for ordering
    pub priority: JobPriority,

    /// Maximum number of handler invocations before permanent failure
    pub max_attempts: u32,

    /// Backoff policy applied between retry attempts
    pub backoff: BackoffPolicy,

    /// When the job becomes eligible for processing
    pub scheduled_at: DateTime<Utc>,
}

impl JobMessage {
    /// Create a new job message eligible immediately
    pub fn new(queue: String, job_type: String, payload: Vec<u8>) -> Self {
        Self {
            queue,
            job_type,
            payload,
            priority: JobPriority::default(),
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            scheduled_at: Utc::now(),
        }
    }

    /// Set the job priority
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the backoff policy
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set when the job should become eligible
    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = scheduled_at;
        self
    }
}

/// Per-call overrides for enqueue, merged over the queue's defaults
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Override the default priority
    pub priority: Option<JobPriority>,

    /// Delay before the job becomes eligible
    pub delay: Option<std::time::Duration>,

    /// Override the job type's maximum attempts
    pub max_attempts: Option<u32>,
}

impl EnqueueOptions {
    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}
