pub mod heartbeat;

pub use heartbeat::{HeartbeatBoard, WorkerBeat};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::next_delay;
use crate::broker::connection::ConnectionManager;
use crate::config::ManagerConfig;
use crate::error::{HandlerError, QueueError, QueueResult};
use crate::registry::{HandlerRegistry, QueueRegistry};
use crate::types::{LeasedJob, WorkerId};

/// Handle for managing worker pool lifecycle
pub struct WorkerPoolHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Gracefully shut down all worker and maintenance loops
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            handle
                .await
                .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))?;
        }
        Ok(())
    }
}

/// Per-queue set of concurrent consumer loops plus the shared maintenance
/// loops (scheduler, lease reaper, retention sweep).
///
/// Each queue runs exactly `concurrency` independent loops; exclusivity of
/// job ownership is the broker's guarantee, not the pool's.
pub struct WorkerPool;

impl WorkerPool {
    /// Spawn all loops and return a joinable handle
    pub fn start(
        queues: Arc<QueueRegistry>,
        handlers: Arc<HandlerRegistry>,
        connection: Arc<ConnectionManager>,
        heartbeats: Arc<HeartbeatBoard>,
        config: ManagerConfig,
    ) -> WorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        for queue_name in queues.queue_names() {
            let concurrency = queues
                .policy(&queue_name)
                .map(|policy| policy.concurrency)
                .unwrap_or(1);

            for index in 0..concurrency {
                let worker = Worker {
                    id: WorkerId::new(&queue_name, index),
                    queue: queue_name.clone(),
                    handlers: handlers.clone(),
                    connection: connection.clone(),
                    heartbeats: heartbeats.clone(),
                    config: config.clone(),
                };
                let shutdown = shutdown_rx.clone();
                handles.push(tokio::spawn(worker.run(shutdown)));
            }

            info!(queue = %queue_name, concurrency, "Started workers");
        }

        handles.push(tokio::spawn(scheduler_loop(
            connection.clone(),
            config.clone(),
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(reaper_loop(
            connection.clone(),
            config.clone(),
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(sweep_loop(
            queues,
            connection,
            config,
            shutdown_rx,
        )));

        WorkerPoolHandle {
            shutdown_tx,
            handles,
        }
    }
}

/// A single consumer loop bound to one queue
struct Worker {
    id: WorkerId,
    queue: String,
    handlers: Arc<HandlerRegistry>,
    connection: Arc<ConnectionManager>,
    heartbeats: Arc<HeartbeatBoard>,
    config: ManagerConfig,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = %self.id, "Worker loop started");

        loop {
            if *shutdown.borrow() {
                debug!(worker = %self.id, "Worker shutdown requested");
                break;
            }

            // An attempt in progress always runs to resolution; shutdown
            // interrupts only the idle wait, so no leased job is abandoned
            // to the visibility timeout
            match self.process_next().await {
                Ok(true) => {}
                Ok(false) => self.idle(&mut shutdown).await,
                Err(e) => {
                    error!(worker = %self.id, error = %e, "Error processing job");
                    self.idle(&mut shutdown).await;
                }
            }
        }
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    /// Dequeue and resolve one job; returns false when nothing was available
    async fn process_next(&self) -> QueueResult<bool> {
        self.heartbeats.beat(&self.id, &self.queue);

        // While the broker is down there is nothing to dequeue; new work is
        // being executed inline by the producer
        if !self.connection.is_available() {
            return Ok(false);
        }

        let leased = match self
            .connection
            .broker()
            .dequeue(&self.queue, self.config.lease_duration)
            .await?
        {
            Some(leased) => leased,
            None => return Ok(false),
        };

        self.execute(leased).await?;
        self.heartbeats.beat(&self.id, &self.queue);
        Ok(true)
    }

    async fn execute(&self, leased: LeasedJob) -> QueueResult<()> {
        let job_id = leased.record.job_id.clone();
        let job_type = leased.record.message.job_type.clone();
        debug!(worker = %self.id, job_id = %job_id, job_type = %job_type, "Processing job");

        let outcome = match self.handlers.handler(&self.queue, &job_type) {
            Ok(handler) => {
                let payload = &leased.record.message.payload;
                let attempt = async {
                    match handler.timeout() {
                        Some(timeout) => {
                            match tokio::time::timeout(timeout, handler.call(payload)).await {
                                Ok(result) => result,
                                Err(_) => Err(HandlerError::retryable("Execution timed out")),
                            }
                        }
                        None => handler.call(payload).await,
                    }
                };
                tokio::pin!(attempt);

                // Keep beating while the handler runs so a long-running job
                // does not get its worker reported unhealthy
                let mut beats = tokio::time::interval(self.config.heartbeat_interval);
                loop {
                    tokio::select! {
                        result = &mut attempt => break result,
                        _ = beats.tick() => self.heartbeats.beat(&self.id, &self.queue),
                    }
                }
            }
            // Dispatch misconfiguration is not worth retrying
            Err(_) => Err(HandlerError::permanent(format!(
                "No handler registered for job type '{}'",
                job_type
            ))),
        };

        match outcome {
            Ok(()) => {
                self.connection
                    .broker()
                    .ack_complete(&job_id, &leased.lease_token)
                    .await?;
                info!(worker = %self.id, job_id = %job_id, "Job completed");
            }

            Err(handler_error) => {
                let record = &leased.record;
                let retry_at = if handler_error.is_retryable()
                    && record.attempts_made < record.message.max_attempts
                {
                    let delay = next_delay(record.attempts_made, &record.message.backoff);
                    Some(
                        chrono::Duration::from_std(delay)
                            .ok()
                            .and_then(|delay| Utc::now().checked_add_signed(delay))
                            .unwrap_or(DateTime::<Utc>::MAX_UTC),
                    )
                } else {
                    None
                };

                self.connection
                    .broker()
                    .ack_fail(
                        &job_id,
                        &leased.lease_token,
                        handler_error.to_string(),
                        retry_at,
                    )
                    .await?;

                if retry_at.is_some() {
                    warn!(worker = %self.id, job_id = %job_id, error = %handler_error, "Job failed, will retry");
                } else {
                    error!(worker = %self.id, job_id = %job_id, error = %handler_error, "Job failed permanently");
                }
            }
        }

        Ok(())
    }
}

/// Promote due Delayed jobs back to Waiting
async fn scheduler_loop(
    connection: Arc<ConnectionManager>,
    config: ManagerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.scheduler_interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                if !connection.is_available() {
                    continue;
                }
                match connection.broker().promote_due(Utc::now()).await {
                    Ok(promoted) if promoted > 0 => {
                        debug!(promoted, "Promoted delayed jobs");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Scheduler tick failed"),
                }
            }
        }
    }
}

/// Reclaim jobs whose lease expired (visibility timeout)
async fn reaper_loop(
    connection: Arc<ConnectionManager>,
    config: ManagerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.reaper_interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                if !connection.is_available() {
                    continue;
                }
                match connection.broker().reap_expired_leases(Utc::now()).await {
                    Ok(reclaimed) if reclaimed > 0 => {
                        info!(reclaimed, "Reclaimed expired leases");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Lease reaping failed"),
                }
            }
        }
    }
}

/// Purge terminal jobs past their queue's retention age
async fn sweep_loop(
    queues: Arc<QueueRegistry>,
    connection: Arc<ConnectionManager>,
    config: ManagerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.sweep_interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                if !connection.is_available() {
                    continue;
                }
                for queue in queues.queue_names() {
                    let Ok(policy) = queues.policy(&queue) else { continue };
                    match connection
                        .broker()
                        .purge_expired(
                            &queue,
                            Utc::now(),
                            policy.completed_retention,
                            policy.failed_retention,
                        )
                        .await
                    {
                        Ok(purged) if purged > 0 => {
                            debug!(queue = %queue, purged, "Purged terminal jobs");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(queue = %queue, error = %e, "Retention sweep failed"),
                    }
                }
            }
        }
    }
}
