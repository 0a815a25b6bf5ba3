use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::connection::ConnectionManager;
use crate::config::ManagerConfig;
use crate::error::QueueResult;
use crate::registry::QueueRegistry;
use crate::types::{QueueCounts, WorkerId};
use crate::worker::HeartbeatBoard;

/// Health of a single worker loop, derived from heartbeat freshness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub worker_id: WorkerId,
    pub queue: String,
    pub last_heartbeat: DateTime<Utc>,
    pub healthy: bool,
}

/// Aggregate health across the subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub broker_available: bool,
    pub workers: Vec<WorkerHealth>,
}

/// Read-only aggregation of counts and health for external operational
/// consumers. The administrative surface that serves this (HTTP, auth) is
/// outside this crate.
pub struct Monitor {
    queues: Arc<QueueRegistry>,
    connection: Arc<ConnectionManager>,
    heartbeats: Arc<HeartbeatBoard>,
    heartbeat_interval: std::time::Duration,
    missed_heartbeats: u32,
}

impl Monitor {
    pub fn new(
        queues: Arc<QueueRegistry>,
        connection: Arc<ConnectionManager>,
        heartbeats: Arc<HeartbeatBoard>,
        config: &ManagerConfig,
    ) -> Self {
        Self {
            queues,
            connection,
            heartbeats,
            heartbeat_interval: config.heartbeat_interval,
            missed_heartbeats: config.missed_heartbeats,
        }
    }

    /// Per-queue job counts
    pub async fn stats(&self) -> QueueResult<HashMap<String, QueueCounts>> {
        let mut stats = HashMap::new();
        for queue in self.queues.queue_names() {
            let counts = self.connection.broker().counts(&queue).await?;
            stats.insert(queue, counts);
        }
        Ok(stats)
    }

    /// Broker availability and per-worker heartbeat freshness.
    ///
    /// A worker that has missed `missed_heartbeats` consecutive intervals is
    /// reported unhealthy; restarting it is an operational concern outside
    /// this crate.
    pub fn health(&self) -> HealthReport {
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(
            self.heartbeat_interval * self.missed_heartbeats,
        )
        .unwrap_or(chrono::Duration::MAX);

        let mut workers: Vec<WorkerHealth> = self
            .heartbeats
            .snapshot()
            .into_iter()
            .map(|(worker_id, beat)| WorkerHealth {
                worker_id,
                queue: beat.queue,
                healthy: now - beat.last_beat <= stale_after,
                last_heartbeat: beat.last_beat,
            })
            .collect();
        workers.sort_by(|a, b| a.worker_id.0.cmp(&b.worker_id.0));

        HealthReport {
            broker_available: self.connection.is_available(),
            workers,
        }
    }
}
