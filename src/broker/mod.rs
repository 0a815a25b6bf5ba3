pub mod connection;
pub mod memory;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;

use crate::config::RateLimit;
use crate::error::QueueResult;
use crate::types::{
    JobEvent, JobId, JobMessage, JobRecord, JobStage, JobStatus, LeaseToken, LeasedJob,
    QueueCounts,
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Broker trait: the backing store providing atomic dequeue, persistence,
/// and delayed-delivery primitives.
///
/// All cross-loop coordination lives here. Exclusivity of dequeue and
/// rate-limit token accounting are the broker's responsibility, never
/// in-process locks in the workers, since workers may run in multiple
/// processes against the same broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Register a queue's rate limit with the broker; called once at startup
    /// for every defined queue.
    async fn configure_queue(&self, queue: &str, rate_limit: Option<RateLimit>) -> QueueResult<()>;

    /// Persist a job and make it eligible at `message.scheduled_at`
    async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId>;

    /// Atomically lease the next eligible Waiting job, if the queue's rate
    /// limiter grants a token. No two callers can obtain the same job.
    /// Increments the job's `attempts_made`.
    async fn dequeue(&self, queue: &str, lease_duration: Duration)
        -> QueueResult<Option<LeasedJob>>;

    /// Acknowledge job completion (lease token required)
    async fn ack_complete(&self, job_id: &JobId, lease_token: &LeaseToken) -> QueueResult<()>;

    /// Acknowledge job failure. With `retry_at` the job transitions to
    /// Delayed until that time; without it the job fails permanently.
    /// Attempts are never granted past `max_attempts` regardless of
    /// `retry_at`.
    async fn ack_fail(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<()>;

    /// Remove a Waiting or Delayed job before a worker claims it.
    /// Active jobs cannot be removed; terminal jobs return `false`.
    async fn remove(&self, job_id: &JobId) -> QueueResult<bool>;

    /// Reset a permanently failed job back to Waiting with attempts cleared
    async fn retry_failed(&self, job_id: &JobId) -> QueueResult<()>;

    /// Get job status
    async fn get_status(&self, job_id: &JobId) -> QueueResult<JobStatus>;

    /// Get full job record
    async fn get_record(&self, job_id: &JobId) -> QueueResult<JobRecord>;

    /// List jobs on a queue in a given lifecycle stage
    async fn list_by_stage(&self, queue: &str, stage: JobStage) -> QueueResult<Vec<JobRecord>>;

    /// Per-stage counts for a queue
    async fn counts(&self, queue: &str) -> QueueResult<QueueCounts>;

    /// Promote due Delayed jobs back to Waiting; returns how many moved
    async fn promote_due(&self, now: DateTime<Utc>) -> QueueResult<usize>;

    /// Reclaim jobs whose lease expired (visibility timeout): back to
    /// Waiting while attempts remain, otherwise Failed. Returns how many
    /// were reclaimed.
    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> QueueResult<usize>;

    /// Purge terminal jobs past their retention age. Idempotent and safe to
    /// run concurrently with normal processing. Returns how many were
    /// purged.
    async fn purge_expired(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        completed_retention: Duration,
        failed_retention: Duration,
    ) -> QueueResult<usize>;

    /// Liveness probe used by the connection manager
    async fn ping(&self) -> QueueResult<()>;

    /// Event stream for observability (boxed for stable Rust)
    fn event_stream(&self) -> BoxStream<JobEvent>;
}
