use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::types::WorkerId;

/// Latest heartbeat recorded by a worker loop
#[derive(Debug, Clone)]
pub struct WorkerBeat {
    pub queue: String,
    pub last_beat: DateTime<Utc>,
}

/// Shared board where worker loops record heartbeats and the monitoring API
/// reads them. Workers beat on every loop iteration; a worker that stops
/// beating is reported unhealthy but never auto-restarted by this crate.
#[derive(Debug, Default)]
pub struct HeartbeatBoard {
    beats: DashMap<WorkerId, WorkerBeat>,
}

impl HeartbeatBoard {
    pub fn new() -> Self {
        Self {
            beats: DashMap::new(),
        }
    }

    /// Record a heartbeat for a worker
    pub fn beat(&self, worker_id: &WorkerId, queue: &str) {
        self.beats.insert(
            worker_id.clone(),
            WorkerBeat {
                queue: queue.to_string(),
                last_beat: Utc::now(),
            },
        );
    }

    /// Snapshot of all known workers and their last beats
    pub fn snapshot(&self) -> Vec<(WorkerId, WorkerBeat)> {
        self.beats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of workers that have ever beaten
    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }
}
