use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::broker::{BoxStream, Broker};
use crate::config::RateLimit;
use crate::error::{QueueError, QueueResult};
use crate::types::{
    JobEvent, JobId, JobMessage, JobPriority, JobRecord, JobStage, JobStatus, LeaseToken,
    LeasedJob, QueueCounts,
};

/// Entry in a queue's ready deque; carries the ordering keys so insertion
/// never has to consult the job map
#[derive(Debug, Clone)]
struct ReadyEntry {
    job_id: JobId,
    priority: JobPriority,
    created_at: DateTime<Utc>,
}

/// Entry in the delayed min-heap, ordered by scheduled time
#[derive(Debug, Clone, PartialEq, Eq)]
struct DelayedEntry {
    at: DateTime<Utc>,
    job_id: JobId,
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest time pops first
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.job_id.0.cmp(&self.job_id.0))
    }
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Token bucket gating how many jobs a queue may start per window
#[derive(Debug)]
struct TokenBucket {
    limit: RateLimit,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: RateLimit) -> Self {
        Self {
            tokens: f64::from(limit.max_starts),
            limit,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let rate = f64::from(self.limit.max_starts) / self.limit.per.as_secs_f64();
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * rate).min(f64::from(self.limit.max_starts));
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// In-memory broker for testing, development, and single-process deployments.
///
/// All coordination state (lease issuance, ready ordering, delay heap, rate
/// tokens) lives here so that worker loops never coordinate through their own
/// locks.
pub struct MemoryBroker {
    /// Job records indexed by job_id
    jobs: RwLock<HashMap<JobId, JobRecord>>,

    /// Ready (Waiting) jobs per queue, priority-ordered, FIFO within priority.
    /// Entries are lazily dropped when the record moved on without passing
    /// through this index.
    ready: RwLock<HashMap<String, VecDeque<ReadyEntry>>>,

    /// Delayed jobs across all queues, ordered by scheduled time
    delayed: Mutex<BinaryHeap<DelayedEntry>>,

    /// Per-queue token buckets (only for queues with a rate limit)
    buckets: Mutex<HashMap<String, TokenBucket>>,

    /// Health switch consulted by `ping`; flip with `set_healthy` to simulate
    /// an outage deterministically in tests
    healthy: AtomicBool,

    /// Event broadcaster for observability
    event_broadcaster: broadcast::Sender<JobEvent>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(1000);

        Self {
            jobs: RwLock::new(HashMap::new()),
            ready: RwLock::new(HashMap::new()),
            delayed: Mutex::new(BinaryHeap::new()),
            buckets: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            event_broadcaster,
        }
    }

    /// Simulate broker availability (test helper)
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Force a job's lease to be already expired (test helper)
    pub fn force_lease_expiry(&self, job_id: &JobId) {
        let mut jobs = self.jobs.write();
        if let Some(record) = jobs.get_mut(job_id) {
            if let JobStatus::Active { ref mut lease_until } = record.status {
                *lease_until = Utc::now() - chrono::Duration::seconds(1);
            }
            if record.lease_until.is_some() {
                record.lease_until = Some(Utc::now() - chrono::Duration::seconds(1));
            }
        }
    }

    /// Backdate a terminal job's finish time (test helper for retention)
    pub fn backdate_finish(&self, job_id: &JobId, finished_at: DateTime<Utc>) {
        let mut jobs = self.jobs.write();
        if let Some(record) = jobs.get_mut(job_id) {
            record.finished_at = Some(finished_at);
            match record.status {
                JobStatus::Completed { .. } => {
                    record.status = JobStatus::Completed {
                        finished_at,
                    };
                }
                JobStatus::Failed { ref error, .. } => {
                    record.status = JobStatus::Failed {
                        failed_at: finished_at,
                        error: error.clone(),
                    };
                }
                _ => {}
            }
        }
    }

    fn push_ready(&self, queue: &str, entry: ReadyEntry) {
        let mut ready = self.ready.write();
        let deque = ready.entry(queue.to_string()).or_default();

        // Higher priority first, FIFO within the same priority
        let pos = deque
            .iter()
            .position(|existing| match entry.priority.cmp(&existing.priority) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => entry.created_at < existing.created_at,
            })
            .unwrap_or(deque.len());

        deque.insert(pos, entry);
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.event_broadcaster.send(event);
    }

    fn verify_lease(record: &JobRecord, lease_token: &LeaseToken) -> QueueResult<()> {
        if record.status.is_terminal() {
            return Err(QueueError::JobAlreadyTerminal);
        }
        if record.lease_token.as_ref() != Some(lease_token) {
            return Err(QueueError::InvalidLeaseToken);
        }
        if let Some(lease_until) = record.lease_until {
            if Utc::now() > lease_until {
                return Err(QueueError::LeaseExpired);
            }
        }
        Ok(())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn configure_queue(&self, queue: &str, rate_limit: Option<RateLimit>) -> QueueResult<()> {
        let mut buckets = self.buckets.lock();
        match rate_limit {
            Some(limit) => {
                buckets.insert(queue.to_string(), TokenBucket::new(limit));
            }
            None => {
                buckets.remove(queue);
            }
        }
        Ok(())
    }

    async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId> {
        let job_id = JobId::new();
        let record = JobRecord::new(job_id.clone(), message);
        let queue = record.message.queue.clone();
        let job_type = record.message.job_type.clone();
        let created_at = record.created_at;
        let priority = record.message.priority;
        let delayed_until = match record.status {
            JobStatus::Delayed { scheduled_at } => Some(scheduled_at),
            _ => None,
        };

        self.jobs.write().insert(job_id.clone(), record);

        match delayed_until {
            Some(at) => {
                self.delayed.lock().push(DelayedEntry {
                    at,
                    job_id: job_id.clone(),
                });
            }
            None => {
                self.push_ready(
                    &queue,
                    ReadyEntry {
                        job_id: job_id.clone(),
                        priority,
                        created_at,
                    },
                );
            }
        }

        self.emit(JobEvent::Enqueued {
            job_id: job_id.clone(),
            queue,
            job_type,
            at: created_at,
        });

        Ok(job_id)
    }

    async fn dequeue(
        &self,
        queue: &str,
        lease_duration: Duration,
    ) -> QueueResult<Option<LeasedJob>> {
        let now = Utc::now();

        loop {
            // Pop one candidate under the ready lock; exclusivity follows
            // from the single pop
            let entry = {
                let mut ready = self.ready.write();
                match ready.get_mut(queue) {
                    Some(deque) => match deque.pop_front() {
                        Some(entry) => entry,
                        None => return Ok(None),
                    },
                    None => return Ok(None),
                }
            };

            let mut jobs = self.jobs.write();
            let record = match jobs.get_mut(&entry.job_id) {
                Some(record) if matches!(record.status, JobStatus::Waiting) => record,
                // Stale index entry (removed or already transitioned)
                _ => continue,
            };

            // Rate gate: job starts per window, independent of concurrency.
            // Checked after a candidate is found so no token is wasted on an
            // empty queue.
            let granted = self
                .buckets
                .lock()
                .get_mut(queue)
                .map(|bucket| bucket.try_take())
                .unwrap_or(true);

            if !granted {
                drop(jobs);
                let mut ready = self.ready.write();
                ready.entry(queue.to_string()).or_default().push_front(entry);
                return Ok(None);
            }

            let lease_token = LeaseToken::new();
            let lease_until = now
                + chrono::Duration::from_std(lease_duration)
                    .map_err(|e| QueueError::Internal(e.to_string()))?;

            record.start_attempt(lease_token.clone(), lease_until);
            let leased = LeasedJob {
                record: record.clone(),
                lease_token,
                lease_until,
            };
            drop(jobs);

            self.emit(JobEvent::Leased {
                job_id: leased.record.job_id.clone(),
                lease_until,
                at: now,
            });

            return Ok(Some(leased));
        }
    }

    async fn ack_complete(&self, job_id: &JobId, lease_token: &LeaseToken) -> QueueResult<()> {
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        Self::verify_lease(record, lease_token)?;
        record.complete();
        drop(jobs);

        self.emit(JobEvent::Completed {
            job_id: job_id.clone(),
            at: Utc::now(),
        });

        Ok(())
    }

    async fn ack_fail(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        Self::verify_lease(record, lease_token)?;

        match retry_at {
            Some(retry_time) if record.attempts_made < record.message.max_attempts => {
                record.delay_retry(retry_time, error.clone());
                drop(jobs);

                self.delayed.lock().push(DelayedEntry {
                    at: retry_time,
                    job_id: job_id.clone(),
                });
                self.emit(JobEvent::Delayed {
                    job_id: job_id.clone(),
                    retry_at: retry_time,
                    error,
                    at: now,
                });
            }
            Some(_) => {
                // Attempts exhausted; the retry request is ignored
                let message = format!("Max attempts exceeded: {}", error);
                record.fail(message.clone());
                drop(jobs);

                self.emit(JobEvent::Failed {
                    job_id: job_id.clone(),
                    error: message,
                    at: now,
                });
            }
            None => {
                record.fail(error.clone());
                drop(jobs);

                self.emit(JobEvent::Failed {
                    job_id: job_id.clone(),
                    error,
                    at: now,
                });
            }
        }

        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> QueueResult<bool> {
        let mut jobs = self.jobs.write();
        let record = jobs
            .get(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        match record.status {
            JobStatus::Waiting | JobStatus::Delayed { .. } => {
                jobs.remove(job_id);
                drop(jobs);
                // Ready/delayed index entries become stale and are skipped
                // lazily on dequeue and promotion

                self.emit(JobEvent::Removed {
                    job_id: job_id.clone(),
                    at: Utc::now(),
                });
                Ok(true)
            }
            JobStatus::Active { .. } => Err(QueueError::JobActive(job_id.to_string())),
            JobStatus::Completed { .. } | JobStatus::Failed { .. } => Ok(false),
        }
    }

    async fn retry_failed(&self, job_id: &JobId) -> QueueResult<()> {
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if !matches!(record.status, JobStatus::Failed { .. }) {
            return Err(QueueError::Internal(format!(
                "Job {} is not in failed status",
                job_id
            )));
        }

        record.status = JobStatus::Waiting;
        record.attempts_made = 0;
        record.finished_at = None;
        let entry = ReadyEntry {
            job_id: job_id.clone(),
            priority: record.message.priority,
            created_at: record.created_at,
        };
        let queue = record.message.queue.clone();
        drop(jobs);

        self.push_ready(&queue, entry);
        Ok(())
    }

    async fn get_status(&self, job_id: &JobId) -> QueueResult<JobStatus> {
        let jobs = self.jobs.read();
        jobs.get(job_id)
            .map(|record| record.status.clone())
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }

    async fn get_record(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        let jobs = self.jobs.read();
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }

    async fn list_by_stage(&self, queue: &str, stage: JobStage) -> QueueResult<Vec<JobRecord>> {
        let jobs = self.jobs.read();
        let mut records: Vec<JobRecord> = jobs
            .values()
            .filter(|record| record.message.queue == queue && record.status.stage() == stage)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    async fn counts(&self, queue: &str) -> QueueResult<QueueCounts> {
        let jobs = self.jobs.read();
        let mut counts = QueueCounts::default();
        for record in jobs.values().filter(|r| r.message.queue == queue) {
            match record.status.stage() {
                JobStage::Waiting => counts.waiting += 1,
                JobStage::Active => counts.active += 1,
                JobStage::Delayed => counts.delayed += 1,
                JobStage::Completed => counts.completed += 1,
                JobStage::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        // Drain due entries from the heap first, then transition records
        let due: Vec<DelayedEntry> = {
            let mut delayed = self.delayed.lock();
            let mut due = Vec::new();
            while let Some(entry) = delayed.peek() {
                if entry.at <= now {
                    due.push(delayed.pop().unwrap());
                } else {
                    break;
                }
            }
            due
        };

        let mut promoted = 0;
        for entry in due {
            let ready_entry = {
                let mut jobs = self.jobs.write();
                match jobs.get_mut(&entry.job_id) {
                    Some(record)
                        if matches!(
                            record.status,
                            JobStatus::Delayed { scheduled_at } if scheduled_at <= now
                        ) =>
                    {
                        record.promote();
                        Some((
                            record.message.queue.clone(),
                            ReadyEntry {
                                job_id: entry.job_id.clone(),
                                priority: record.message.priority,
                                created_at: record.created_at,
                            },
                        ))
                    }
                    // Stale heap entry (removed, or rescheduled later)
                    _ => None,
                }
            };

            if let Some((queue, ready_entry)) = ready_entry {
                self.push_ready(&queue, ready_entry);
                promoted += 1;
            }
        }

        Ok(promoted)
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let expired: Vec<JobId> = {
            let jobs = self.jobs.read();
            jobs.values()
                .filter(|record| record.lease_expired(now))
                .map(|record| record.job_id.clone())
                .collect()
        };

        enum Reclaimed {
            Requeued(String, ReadyEntry),
            Failed(String),
        }

        let mut reclaimed = 0;
        for job_id in expired {
            let outcome = {
                let mut jobs = self.jobs.write();
                let record = match jobs.get_mut(&job_id) {
                    Some(record) if record.lease_expired(now) => record,
                    _ => continue,
                };

                if record.attempts_made < record.message.max_attempts {
                    // Requeue: the crashed attempt already counted
                    record.status = JobStatus::Waiting;
                    record.lease_token = None;
                    record.lease_until = None;
                    record.last_error = Some("Lease expired".to_string());
                    Reclaimed::Requeued(
                        record.message.queue.clone(),
                        ReadyEntry {
                            job_id: job_id.clone(),
                            priority: record.message.priority,
                            created_at: record.created_at,
                        },
                    )
                } else {
                    let error = "Max attempts exceeded due to lease expiry".to_string();
                    record.fail(error.clone());
                    Reclaimed::Failed(error)
                }
            };

            match outcome {
                Reclaimed::Requeued(queue, entry) => {
                    self.push_ready(&queue, entry);
                    self.emit(JobEvent::Delayed {
                        job_id: job_id.clone(),
                        retry_at: now,
                        error: "Lease expired".to_string(),
                        at: now,
                    });
                }
                Reclaimed::Failed(error) => {
                    self.emit(JobEvent::Failed {
                        job_id: job_id.clone(),
                        error,
                        at: now,
                    });
                }
            }
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    async fn purge_expired(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        completed_retention: Duration,
        failed_retention: Duration,
    ) -> QueueResult<usize> {
        let completed_cutoff = now
            - chrono::Duration::from_std(completed_retention)
                .map_err(|e| QueueError::Internal(e.to_string()))?;
        let failed_cutoff = now
            - chrono::Duration::from_std(failed_retention)
                .map_err(|e| QueueError::Internal(e.to_string()))?;

        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, record| {
            if record.message.queue != queue {
                return true;
            }
            match record.status {
                JobStatus::Completed { finished_at } => finished_at > completed_cutoff,
                JobStatus::Failed { failed_at, .. } => failed_at > failed_cutoff,
                _ => true,
            }
        });

        Ok(before - jobs.len())
    }

    async fn ping(&self) -> QueueResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::BrokerUnavailable)
        }
    }

    fn event_stream(&self) -> BoxStream<JobEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let receiver = self.event_broadcaster.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|result| result.ok());
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_message() -> JobMessage {
        JobMessage::new(
            "default".to_string(),
            "test_job".to_string(),
            b"{}".to_vec(),
        )
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_leases() {
        let broker = MemoryBroker::new();
        let job_id = broker.enqueue(test_message()).await.unwrap();

        let leased = broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(leased.record.job_id, job_id);
        assert_eq!(leased.record.attempts_made, 1);
        assert!(leased.lease_until > Utc::now());

        let status = broker.get_status(&job_id).await.unwrap();
        assert!(status.is_active());
    }

    #[tokio::test]
    async fn second_dequeue_finds_nothing() {
        let broker = MemoryBroker::new();
        broker.enqueue(test_message()).await.unwrap();

        assert!(broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .is_some());
        assert!(broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn priority_orders_dequeue() {
        let broker = MemoryBroker::new();
        let low = broker
            .enqueue(test_message().with_priority(JobPriority::Low))
            .await
            .unwrap();
        let high = broker
            .enqueue(test_message().with_priority(JobPriority::High))
            .await
            .unwrap();

        let first = broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();
        let second = broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.record.job_id, high);
        assert_eq!(second.record.job_id, low);
    }

    #[tokio::test]
    async fn delayed_job_needs_promotion() {
        let broker = MemoryBroker::new();
        let message =
            test_message().with_scheduled_at(Utc::now() + chrono::Duration::milliseconds(50));
        let job_id = broker.enqueue(message).await.unwrap();

        assert!(broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .is_none());
        let status = broker.get_status(&job_id).await.unwrap();
        assert_eq!(status.stage(), JobStage::Delayed);

        // Not due yet
        assert_eq!(broker.promote_due(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + chrono::Duration::milliseconds(100);
        assert_eq!(broker.promote_due(later).await.unwrap(), 1);
        assert!(broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn rate_limit_gates_starts() {
        let broker = MemoryBroker::new();
        broker
            .configure_queue(
                "default",
                Some(RateLimit {
                    max_starts: 2,
                    per: Duration::from_secs(60),
                }),
            )
            .await
            .unwrap();

        for _ in 0..5 {
            broker.enqueue(test_message()).await.unwrap();
        }

        let mut starts = 0;
        for _ in 0..5 {
            if broker
                .dequeue("default", Duration::from_secs(300))
                .await
                .unwrap()
                .is_some()
            {
                starts += 1;
            }
        }

        // Bucket held 2 tokens; the window is far too long to refill
        assert_eq!(starts, 2);

        let counts = broker.counts("default").await.unwrap();
        assert_eq!(counts.waiting, 3);
        assert_eq!(counts.active, 2);
    }

    #[tokio::test]
    async fn ack_fail_respects_max_attempts() {
        let broker = MemoryBroker::new();
        let job_id = broker
            .enqueue(test_message().with_max_attempts(1))
            .await
            .unwrap();

        let leased = broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();

        // Retry requested but attempts are exhausted
        broker
            .ack_fail(
                &job_id,
                &leased.lease_token,
                "boom".to_string(),
                Some(Utc::now()),
            )
            .await
            .unwrap();

        let record = broker.get_record(&job_id).await.unwrap();
        assert_eq!(record.status.stage(), JobStage::Failed);
        assert!(record.attempts_made <= record.message.max_attempts);
    }

    #[tokio::test]
    async fn wrong_lease_token_is_rejected() {
        let broker = MemoryBroker::new();
        let job_id = broker.enqueue(test_message()).await.unwrap();
        let _leased = broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();

        let result = broker
            .ack_complete(&job_id, &LeaseToken::from("bogus"))
            .await;
        assert!(matches!(result, Err(QueueError::InvalidLeaseToken)));
    }

    #[tokio::test]
    async fn remove_refuses_active_jobs() {
        let broker = MemoryBroker::new();
        let waiting = broker.enqueue(test_message()).await.unwrap();
        let active = broker.enqueue(test_message()).await.unwrap();

        // Lease the first enqueued job
        let leased = broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.record.job_id, waiting);

        assert!(matches!(
            broker.remove(&waiting).await,
            Err(QueueError::JobActive(_))
        ));
        assert!(broker.remove(&active).await.unwrap());
        assert!(matches!(
            broker.get_status(&active).await,
            Err(QueueError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn reaper_requeues_expired_lease() {
        let broker = MemoryBroker::new();
        let job_id = broker.enqueue(test_message()).await.unwrap();
        let _leased = broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();

        broker.force_lease_expiry(&job_id);
        let reclaimed = broker.reap_expired_leases(Utc::now()).await.unwrap();
        assert_eq!(reclaimed, 1);

        let second = broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.record.job_id, job_id);
        assert_eq!(second.record.attempts_made, 2);
    }

    #[tokio::test]
    async fn purge_respects_retention_split() {
        let broker = MemoryBroker::new();

        let completed = broker.enqueue(test_message()).await.unwrap();
        let leased = broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();
        broker
            .ack_complete(&completed, &leased.lease_token)
            .await
            .unwrap();

        let failed = broker
            .enqueue(test_message().with_max_attempts(1))
            .await
            .unwrap();
        let leased = broker
            .dequeue("default", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();
        broker
            .ack_fail(&failed, &leased.lease_token, "boom".to_string(), None)
            .await
            .unwrap();

        let two_hours_ago = Utc::now() - chrono::Duration::hours(2);
        broker.backdate_finish(&completed, two_hours_ago);
        broker.backdate_finish(&failed, two_hours_ago);

        // Completed retention (1h) has elapsed, failed retention (1 week)
        // has not
        let purged = broker
            .purge_expired(
                "default",
                Utc::now(),
                Duration::from_secs(3600),
                Duration::from_secs(7 * 24 * 3600),
            )
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(matches!(
            broker.get_status(&completed).await,
            Err(QueueError::JobNotFound(_))
        ));
        assert!(broker.get_status(&failed).await.is_ok());

        // Sweep is idempotent
        let purged = broker
            .purge_expired(
                "default",
                Utc::now(),
                Duration::from_secs(3600),
                Duration::from_secs(7 * 24 * 3600),
            )
            .await
            .unwrap();
        assert_eq!(purged, 0);
    }
}
