use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use taskmill::{
    EnqueueOptions, HandlerError, Job, JobStatus, ManagerConfig, MemoryBroker, QueueManager,
    QueuePolicy,
};

fn fast_config() -> ManagerConfig {
    ManagerConfig {
        poll_interval: Duration::from_millis(10),
        scheduler_interval: Duration::from_millis(10),
        health_check_interval: Duration::from_millis(50),
        reconnect_backoff: taskmill::BackoffPolicy::Fixed {
            delay: Duration::from_millis(50),
        },
        ..ManagerConfig::default()
    }
}

async fn wait_until<F, Fut>(deadline: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while !condition().await {
        assert!(
            start.elapsed() < deadline,
            "condition not met within {:?}",
            deadline
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

static DELIVERIES: AtomicUsize = AtomicUsize::new(0);

#[derive(Serialize, Deserialize)]
struct DeliverWebhook {
    url: String,
}

#[async_trait]
impl Job for DeliverWebhook {
    const JOB_TYPE: &'static str = "deliver_webhook";

    async fn run(&self) -> Result<(), HandlerError> {
        DELIVERIES.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn manager_with(broker: Arc<MemoryBroker>) -> QueueManager {
    QueueManager::builder(fast_config())
        .define_queue("hooks", QueuePolicy::default().concurrency(2))
        .register::<DeliverWebhook>("hooks")
        .unwrap()
        .build(broker)
}

/// Broker outage mid-run: new enqueues run inline, health reports the
/// outage, and the asynchronous path resumes after recovery.
#[tokio::test]
async fn outage_degrades_to_inline_and_recovers() {
    let broker = Arc::new(MemoryBroker::new());
    let manager = manager_with(broker.clone());
    let runtime = manager.start().await.unwrap();

    // Normal operation first
    let handle = manager
        .producer()
        .enqueue_job(
            "hooks",
            &DeliverWebhook {
                url: "https://x.test/1".into(),
            },
            EnqueueOptions::default(),
        )
        .await
        .unwrap();
    assert!(!handle.is_inline());

    wait_until(Duration::from_secs(5), || async {
        DELIVERIES.load(Ordering::SeqCst) >= 1
    })
    .await;

    // Broker goes down
    broker.set_healthy(false);
    manager.connection().check_now().await;
    assert!(!manager.connection().is_available());
    assert!(!manager.monitor().health().broker_available);

    let delivered_before = DELIVERIES.load(Ordering::SeqCst);
    let handle = manager
        .producer()
        .enqueue_job(
            "hooks",
            &DeliverWebhook {
                url: "https://x.test/2".into(),
            },
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    // Inline execution: the handler already ran, nothing was persisted
    assert!(handle.is_inline());
    assert!(handle.inline_result().unwrap().is_ok());
    assert_eq!(DELIVERIES.load(Ordering::SeqCst), delivered_before + 1);

    // Broker comes back; the health loop flips availability without manual
    // intervention
    broker.set_healthy(true);
    {
        let manager = &manager;
        wait_until(Duration::from_secs(5), move || async move {
            manager.connection().is_available()
        })
        .await;
    }
    assert!(manager.monitor().health().broker_available);

    // Asynchronous enqueue and worker processing resume
    let handle = manager
        .producer()
        .enqueue_job(
            "hooks",
            &DeliverWebhook {
                url: "https://x.test/3".into(),
            },
            EnqueueOptions::default(),
        )
        .await
        .unwrap();
    let job_id = handle.job_id().expect("async path resumed").clone();

    let store = manager.store();
    {
        let job_id = &job_id;
        wait_until(Duration::from_secs(5), move || async move {
            store
                .job_record(job_id)
                .await
                .map(|r| r.status.is_terminal())
                .unwrap_or(false)
        })
        .await;
    }
    let record = store.job_record(&job_id).await.unwrap();
    assert!(matches!(record.status, JobStatus::Completed { .. }));

    runtime.shutdown().await.unwrap();
}

static SLOW_DELIVERIES: AtomicUsize = AtomicUsize::new(0);

#[derive(Serialize, Deserialize)]
struct SlowDelivery;

#[async_trait]
impl Job for SlowDelivery {
    const JOB_TYPE: &'static str = "slow_delivery";

    async fn run(&self) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        SLOW_DELIVERIES.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Jobs already executing when the outage begins run to completion; only
/// new dequeues stop.
#[tokio::test]
async fn active_jobs_finish_during_outage() {
    let broker = Arc::new(MemoryBroker::new());
    let manager = QueueManager::builder(fast_config())
        .define_queue("hooks", QueuePolicy::default().concurrency(1))
        .register::<SlowDelivery>("hooks")
        .unwrap()
        .build(broker.clone());
    let runtime = manager.start().await.unwrap();

    let handle = manager
        .producer()
        .enqueue_job("hooks", &SlowDelivery, EnqueueOptions::default())
        .await
        .unwrap();
    let job_id = handle.job_id().unwrap().clone();

    // Wait until a worker holds the job, then take the broker down
    let store = manager.store();
    {
        let job_id = &job_id;
        wait_until(Duration::from_secs(5), move || async move {
            store
                .job_record(job_id)
                .await
                .map(|r| r.status.is_active())
                .unwrap_or(false)
        })
        .await;
    }
    broker.set_healthy(false);
    manager.connection().check_now().await;

    // The in-flight attempt still completes and acks
    {
        let job_id = &job_id;
        wait_until(Duration::from_secs(5), move || async move {
            store
                .job_record(job_id)
                .await
                .map(|r| r.status.is_terminal())
                .unwrap_or(false)
        })
        .await;
    }
    let record = store.job_record(&job_id).await.unwrap();
    assert!(matches!(record.status, JobStatus::Completed { .. }));
    assert_eq!(SLOW_DELIVERIES.load(Ordering::SeqCst), 1);

    runtime.shutdown().await.unwrap();
}
