use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::broker::connection::ConnectionManager;
use crate::error::QueueResult;
use crate::job::Job;
use crate::registry::{ErasedHandler, HandlerRegistry, QueueRegistry};
use crate::types::{EnqueueOptions, JobHandle, JobMessage};

/// How an enqueue call is carried out, selected by the connection manager's
/// availability state so call sites stay uniform regardless of mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnqueueStrategy {
    /// Serialize and submit to the broker; the call does not block on
    /// execution
    Async,

    /// Broker unreachable: run the registered handler synchronously in the
    /// caller's task; nothing is persisted
    SynchronousFallback,
}

impl EnqueueStrategy {
    fn select(connection: &ConnectionManager) -> Self {
        if connection.is_available() {
            Self::Async
        } else {
            Self::SynchronousFallback
        }
    }
}

/// Validates and submits jobs.
///
/// Payloads are validated against the registered job type before anything
/// else happens; no job record is ever created for an invalid payload. When
/// the broker is unavailable the producer degrades to synchronous in-process
/// execution instead of failing the caller.
pub struct Producer {
    queues: Arc<QueueRegistry>,
    handlers: Arc<HandlerRegistry>,
    connection: Arc<ConnectionManager>,
}

impl Producer {
    pub fn new(
        queues: Arc<QueueRegistry>,
        handlers: Arc<HandlerRegistry>,
        connection: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            queues,
            handlers,
            connection,
        }
    }

    /// Enqueue a raw JSON payload for a registered job type.
    ///
    /// Fails synchronously with `UnknownQueue`, `UnknownJobType`, or
    /// `Validation` before any submission. Returns `JobHandle::Enqueued`
    /// on the asynchronous path, or `JobHandle::Inline` carrying the
    /// handler's direct outcome in degraded mode.
    #[instrument(skip(self, payload), fields(queue = queue, job_type = job_type))]
    pub async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> QueueResult<JobHandle> {
        let policy = self.queues.policy(queue)?;
        let handler = self.handlers.handler(queue, job_type)?;
        let payload_bytes = self.handlers.validate(queue, job_type, &payload)?;

        match EnqueueStrategy::select(&self.connection) {
            EnqueueStrategy::Async => {
                let message =
                    build_message(queue, job_type, payload_bytes, &options, policy, &*handler);
                let job_id = self.connection.broker().enqueue(message).await?;

                info!(job_id = %job_id, mode = "async", "Job enqueued");
                Ok(JobHandle::Enqueued { job_id })
            }

            EnqueueStrategy::SynchronousFallback => {
                warn!(mode = "fallback", "Broker unavailable, executing handler inline");
                let result = handler.call(&payload_bytes).await;

                info!(
                    mode = "fallback",
                    ok = result.is_ok(),
                    "Inline execution finished"
                );
                Ok(JobHandle::Inline { result })
            }
        }
    }

    /// Typed convenience wrapper over [`enqueue`](Self::enqueue)
    pub async fn enqueue_job<J: Job>(
        &self,
        queue: &str,
        job: &J,
        options: EnqueueOptions,
    ) -> QueueResult<JobHandle> {
        let payload = serde_json::to_value(job)?;
        self.enqueue(queue, J::JOB_TYPE, payload, options).await
    }
}

/// Merge the queue's default policy with the job type's declarations and
/// per-call overrides. Precedence: per-call > job type > queue default.
fn build_message(
    queue: &str,
    job_type: &str,
    payload: Vec<u8>,
    options: &EnqueueOptions,
    policy: &crate::config::QueuePolicy,
    handler: &dyn ErasedHandler,
) -> JobMessage {
    let max_attempts = options
        .max_attempts
        .or_else(|| handler.max_attempts())
        .unwrap_or(policy.default_max_attempts);
    let backoff = handler.backoff().unwrap_or(policy.default_backoff);

    let mut message = JobMessage::new(queue.to_string(), job_type.to_string(), payload)
        .with_max_attempts(max_attempts)
        .with_backoff(backoff);

    if let Some(priority) = options.priority {
        message = message.with_priority(priority);
    }
    if let Some(delay) = options.delay {
        // Saturate instead of overflowing on absurd delays
        let scheduled_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        message = message.with_scheduled_at(scheduled_at);
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::broker::Broker;
    use crate::config::{ManagerConfig, QueuePolicy};
    use crate::error::{HandlerError, QueueError};
    use crate::types::JobPriority;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct ComposeEmail {
        to: String,
    }

    #[async_trait]
    impl Job for ComposeEmail {
        const JOB_TYPE: &'static str = "compose_email";

        fn max_attempts() -> Option<u32> {
            Some(5)
        }

        async fn run(&self) -> Result<(), HandlerError> {
            if self.to.is_empty() {
                return Err(HandlerError::permanent("empty recipient"));
            }
            Ok(())
        }
    }

    fn producer_with(broker: Arc<MemoryBroker>) -> Producer {
        let mut queues = QueueRegistry::new();
        queues.define("mail", QueuePolicy::default());
        let mut handlers = HandlerRegistry::new();
        handlers.register::<ComposeEmail>("mail").unwrap();

        let connection = Arc::new(ConnectionManager::new(broker, &ManagerConfig::default()));
        Producer::new(Arc::new(queues), Arc::new(handlers), connection)
    }

    #[tokio::test]
    async fn async_path_persists_and_merges_policy() {
        let broker = Arc::new(MemoryBroker::new());
        let producer = producer_with(broker.clone());

        let handle = producer
            .enqueue(
                "mail",
                "compose_email",
                json!({ "to": "a@b.c" }),
                EnqueueOptions::default().priority(JobPriority::High),
            )
            .await
            .unwrap();

        let job_id = handle.job_id().expect("async path carries a job id");
        let record = broker.get_record(job_id).await.unwrap();
        assert_eq!(record.message.priority, JobPriority::High);
        // Job type declaration wins over the queue default
        assert_eq!(record.message.max_attempts, 5);
    }

    #[tokio::test]
    async fn per_call_override_wins() {
        let broker = Arc::new(MemoryBroker::new());
        let producer = producer_with(broker.clone());

        let handle = producer
            .enqueue(
                "mail",
                "compose_email",
                json!({ "to": "a@b.c" }),
                EnqueueOptions::default().max_attempts(1),
            )
            .await
            .unwrap();

        let record = broker.get_record(handle.job_id().unwrap()).await.unwrap();
        assert_eq!(record.message.max_attempts, 1);
    }

    #[tokio::test]
    async fn absurd_delay_saturates_the_schedule() {
        let broker = Arc::new(MemoryBroker::new());
        let producer = producer_with(broker.clone());

        let handle = producer
            .enqueue(
                "mail",
                "compose_email",
                json!({ "to": "a@b.c" }),
                EnqueueOptions::default().delay(std::time::Duration::from_secs(u64::MAX)),
            )
            .await
            .unwrap();

        let record = broker.get_record(handle.job_id().unwrap()).await.unwrap();
        assert_eq!(record.message.scheduled_at, DateTime::<Utc>::MAX_UTC);
        assert_eq!(record.status.stage(), crate::types::JobStage::Delayed);
    }

    #[tokio::test]
    async fn validation_failure_creates_nothing() {
        let broker = Arc::new(MemoryBroker::new());
        let producer = producer_with(broker.clone());

        let err = producer
            .enqueue(
                "mail",
                "compose_email",
                json!({ "to": 42 }),
                EnqueueOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::Validation { .. }));
        let counts = broker.counts("mail").await.unwrap();
        assert_eq!(counts.total(), 0);
    }

    #[tokio::test]
    async fn unknown_queue_and_job_type_fail_synchronously() {
        let broker = Arc::new(MemoryBroker::new());
        let producer = producer_with(broker);

        let err = producer
            .enqueue("nope", "compose_email", json!({}), EnqueueOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::UnknownQueue(_)));

        let err = producer
            .enqueue("mail", "render_pdf", json!({}), EnqueueOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::UnknownJobType(_)));
    }

    #[tokio::test]
    async fn fallback_runs_inline_and_persists_nothing() {
        let broker = Arc::new(MemoryBroker::new());
        let producer = producer_with(broker.clone());

        broker.set_healthy(false);
        producer.connection.check_now().await;

        let handle = producer
            .enqueue(
                "mail",
                "compose_email",
                json!({ "to": "a@b.c" }),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        assert!(handle.is_inline());
        assert!(handle.inline_result().unwrap().is_ok());
        assert_eq!(broker.counts("mail").await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn fallback_surfaces_handler_error_in_handle() {
        let broker = Arc::new(MemoryBroker::new());
        let producer = producer_with(broker.clone());

        broker.set_healthy(false);
        producer.connection.check_now().await;

        let handle = producer
            .enqueue(
                "mail",
                "compose_email",
                json!({ "to": "" }),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let result = handle.inline_result().unwrap();
        assert!(matches!(result, Err(HandlerError::Permanent(_))));
    }
}
