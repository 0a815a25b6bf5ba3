use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobMessage, LeaseToken};

/// Job status lifecycle
///
/// Waiting -> Active -> Completed, or Active -> Delayed -> Waiting on a
/// retryable failure, or Active -> Failed on a permanent failure or when
/// attempts are exhausted. Jobs enqueued with a start delay begin Delayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobStatus {
    /// Job is queued and eligible for dequeue
    Waiting,

    /// Job is owned by exactly one worker until the lease expires
    Active { lease_until: DateTime<Utc> },

    /// Job is waiting for its scheduled time (start delay or retry)
    Delayed { scheduled_at: DateTime<Utc> },

    /// Job completed successfully (terminal, purged after retention)
    Completed { finished_at: DateTime<Utc> },

    /// Job failed permanently (terminal, purged after retention)
    Failed {
        failed_at: DateTime<Utc>,
        error: String,
    },
}

impl JobStatus {
    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Check if the job is currently owned by a worker
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active { .. } => "active",
            Self::Delayed { .. } => "delayed",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    /// The lifecycle stage, ignoring embedded timestamps
    pub fn stage(&self) -> JobStage {
        match self {
            Self::Waiting => JobStage::Waiting,
            Self::Active { .. } => JobStage::Active,
            Self::Delayed { .. } => JobStage::Delayed,
            Self::Completed { .. } => JobStage::Completed,
            Self::Failed { .. } => JobStage::Failed,
        }
    }
}

/// Lifecycle stage without the per-status payload, for filtering and counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStage {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

/// Job record - mutable runtime state stored by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier
    pub job_id: JobId,

    /// Immutable job message data
    pub message: JobMessage,

    /// Current job status
    pub status: JobStatus,

    /// Number of handler invocations so far; never exceeds
    /// `message.max_attempts`
    pub attempts_made: u32,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// When the first attempt started
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,

    /// Last error message (if any)
    pub last_error: Option<String>,

    /// Current lease token (if active)
    pub lease_token: Option<LeaseToken>,

    /// When the current lease expires (if active)
    pub lease_until: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new job record; starts Delayed when scheduled in the future
    pub fn new(job_id: JobId, message: JobMessage) -> Self {
        let now = Utc::now();
        let status = if message.scheduled_at > now {
            JobStatus::Delayed {
                scheduled_at: message.scheduled_at,
            }
        } else {
            JobStatus::Waiting
        };

        Self {
            job_id,
            message,
            status,
            attempts_made: 0,
            created_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
            lease_token: None,
            lease_until: None,
        }
    }

    /// Check if another attempt may be granted
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.message.max_attempts && !self.status.is_terminal()
    }

    /// Check if the lease has expired
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.status, &self.lease_until) {
            (JobStatus::Active { .. }, Some(lease_until)) => *lease_until < now,
            _ => false,
        }
    }

    /// Start an attempt under a lease; increments `attempts_made`
    pub fn start_attempt(&mut self, lease_token: LeaseToken, lease_until: DateTime<Utc>) {
        let now = Utc::now();
        self.attempts_made += 1;
        self.status = JobStatus::Active { lease_until };
        self.lease_token = Some(lease_token);
        self.lease_until = Some(lease_until);
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    /// Complete the job successfully
    pub fn complete(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Completed { finished_at: now };
        self.finished_at = Some(now);
        self.lease_token = None;
        self.lease_until = None;
    }

    /// Fail the job permanently
    pub fn fail(&mut self, error: String) {
        let now = Utc::now();
        self.status = JobStatus::Failed {
            failed_at: now,
            error: error.clone(),
        };
        self.finished_at = Some(now);
        self.last_error = Some(error);
        self.lease_token = None;
        self.lease_until = None;
    }

    /// Schedule a retry at the given time
    pub fn delay_retry(&mut self, scheduled_at: DateTime<Utc>, error: String) {
        self.status = JobStatus::Delayed { scheduled_at };
        self.last_error = Some(error);
        self.lease_token = None;
        self.lease_until = None;
    }

    /// Move a due Delayed job back to Waiting
    pub fn promote(&mut self) {
        self.status = JobStatus::Waiting;
    }
}

/// A job that has been leased for processing
#[derive(Debug, Clone)]
pub struct LeasedJob {
    /// The job record as of the lease
    pub record: JobRecord,

    /// Lease token for acknowledgment
    pub lease_token: LeaseToken,

    /// When the lease expires
    pub lease_until: DateTime<Utc>,
}

/// Per-queue job counts by lifecycle stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

impl QueueCounts {
    /// Total jobs currently known to the broker for this queue
    pub fn total(&self) -> usize {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}
