use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::broker::Broker;
use crate::error::QueueResult;
use crate::registry::QueueRegistry;
use crate::types::{JobId, JobRecord, JobStage, JobStatus, QueueCounts};

/// Broker-backed record of each job's state, with query and cleanup
/// operations
pub struct JobStore {
    broker: Arc<dyn Broker>,
    queues: Arc<QueueRegistry>,
}

impl JobStore {
    pub fn new(broker: Arc<dyn Broker>, queues: Arc<QueueRegistry>) -> Self {
        Self { broker, queues }
    }

    /// Current status of a job
    pub async fn job_status(&self, job_id: &JobId) -> QueueResult<JobStatus> {
        self.broker.get_status(job_id).await
    }

    /// Full record of a job
    pub async fn job_record(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        self.broker.get_record(job_id).await
    }

    /// Jobs on a queue in a given lifecycle stage
    pub async fn list_by_queue_and_status(
        &self,
        queue: &str,
        stage: JobStage,
    ) -> QueueResult<Vec<JobRecord>> {
        self.queues.policy(queue)?;
        self.broker.list_by_stage(queue, stage).await
    }

    /// Per-stage counts for a queue
    pub async fn counts_by_queue(&self, queue: &str) -> QueueResult<QueueCounts> {
        self.queues.policy(queue)?;
        self.broker.counts(queue).await
    }

    /// Reset a permanently failed job back to Waiting with attempts cleared
    pub async fn retry_job(&self, job_id: &JobId) -> QueueResult<()> {
        self.broker.retry_failed(job_id).await
    }

    /// Remove a job before a worker claims it.
    ///
    /// Only Waiting and Delayed jobs can be removed; an Active job cannot be
    /// cancelled mid-execution (known limitation, handlers run to completion
    /// or failure). Terminal jobs return `false` and are left to the
    /// retention sweep.
    pub async fn remove_job(&self, job_id: &JobId) -> QueueResult<bool> {
        self.broker.remove(job_id).await
    }

    /// Run one retention sweep across all queues: purge Completed jobs older
    /// than `completed_retention` and Failed jobs older than
    /// `failed_retention`. Idempotent and safe to run concurrently with
    /// normal processing.
    pub async fn sweep(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let mut purged = 0;
        for queue in self.queues.queue_names() {
            let policy = self.queues.policy(&queue)?;
            purged += self
                .broker
                .purge_expired(
                    &queue,
                    now,
                    policy.completed_retention,
                    policy.failed_retention,
                )
                .await?;
        }

        if purged > 0 {
            info!(purged, "Retention sweep removed terminal jobs");
        }
        Ok(purged)
    }
}
