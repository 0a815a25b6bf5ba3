use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;

/// Dequeue rate limit: at most `max_starts` job starts per `per` window.
///
/// Independent of concurrency; protects downstream dependencies shared by
/// all workers of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_starts: u32,
    pub per: Duration,
}

/// Per-queue policy, loaded once at startup and immutable thereafter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePolicy {
    /// Number of concurrent worker loops for this queue
    pub concurrency: usize,

    /// Optional token-bucket rate limit on job starts
    pub rate_limit: Option<RateLimit>,

    /// Age after which completed jobs are purged
    pub completed_retention: Duration,

    /// Age after which permanently failed jobs are purged; normally longer
    /// than `completed_retention`
    pub failed_retention: Duration,

    /// Default maximum attempts when neither the job type nor the enqueue
    /// call specifies one
    pub default_max_attempts: u32,

    /// Default backoff policy for retries
    pub default_backoff: BackoffPolicy,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            concurrency: 4,
            rate_limit: None,
            completed_retention: Duration::from_secs(3600),
            failed_retention: Duration::from_secs(7 * 24 * 3600),
            default_max_attempts: 3,
            default_backoff: BackoffPolicy::default(),
        }
    }
}

impl QueuePolicy {
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn rate_limit(mut self, max_starts: u32, per: Duration) -> Self {
        self.rate_limit = Some(RateLimit { max_starts, per });
        self
    }

    pub fn completed_retention(mut self, retention: Duration) -> Self {
        self.completed_retention = retention;
        self
    }

    pub fn failed_retention(mut self, retention: Duration) -> Self {
        self.failed_retention = retention;
        self
    }

    pub fn default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    pub fn default_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.default_backoff = backoff;
        self
    }
}

/// Runtime configuration for the queue manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Visibility timeout: how long a dequeued job stays leased before the
    /// reaper reclaims it
    pub lease_duration: Duration,

    /// How often workers report a heartbeat
    pub heartbeat_interval: Duration,

    /// Consecutive missed heartbeats before a worker is reported unhealthy
    pub missed_heartbeats: u32,

    /// Idle sleep between dequeue polls when no job is available
    pub poll_interval: Duration,

    /// How often due Delayed jobs are promoted back to Waiting
    pub scheduler_interval: Duration,

    /// How often expired leases are reclaimed
    pub reaper_interval: Duration,

    /// How often the retention sweep runs
    pub sweep_interval: Duration,

    /// How often the broker connection is health-checked
    pub health_check_interval: Duration,

    /// Backoff ceiling for reconnection probing while the broker is down
    pub reconnect_backoff: BackoffPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(5),
            missed_heartbeats: 3,
            poll_interval: Duration::from_millis(100),
            scheduler_interval: Duration::from_millis(100),
            reaper_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(3),
            reconnect_backoff: BackoffPolicy::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(60),
                jitter: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_builder_clamps_degenerate_values() {
        let policy = QueuePolicy::default().concurrency(0).default_max_attempts(0);
        assert_eq!(policy.concurrency, 1);
        assert_eq!(policy.default_max_attempts, 1);
    }

    #[test]
    fn defaults_keep_failed_retention_longer() {
        let policy = QueuePolicy::default();
        assert!(policy.failed_retention > policy.completed_retention);
    }
}
