use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backoff::{next_delay, BackoffPolicy};
use crate::broker::Broker;
use crate::config::ManagerConfig;

/// Owns connectivity to the broker: health-checks it periodically, exposes
/// the current availability state, and emits connected/disconnected events.
///
/// On a failed ping the availability flag flips to false immediately so the
/// producer can switch strategies without waiting for a failed enqueue.
/// Reconnection probing backs off exponentially with a ceiling; nothing is
/// replayed on reconnect.
pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    available: AtomicBool,
    consecutive_failures: AtomicU32,
    events: watch::Sender<bool>,
    health_check_interval: std::time::Duration,
    reconnect_backoff: BackoffPolicy,
}

impl ConnectionManager {
    pub fn new(broker: Arc<dyn Broker>, config: &ManagerConfig) -> Self {
        let (events, _) = watch::channel(true);
        Self {
            broker,
            available: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            events,
            health_check_interval: config.health_check_interval,
            reconnect_backoff: config.reconnect_backoff,
        }
    }

    /// Current availability snapshot
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Subscribe to connected (true) / disconnected (false) transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.events.subscribe()
    }

    /// The managed broker
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Ping the broker once and update availability; returns the new state
    pub async fn check_now(&self) -> bool {
        match self.broker.ping().await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                if !self.available.swap(true, Ordering::SeqCst) {
                    info!("Broker connection restored");
                    let _ = self.events.send(true);
                }
                true
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if self.available.swap(false, Ordering::SeqCst) {
                    warn!(error = %err, "Broker unreachable, switching to degraded mode");
                    let _ = self.events.send(false);
                } else {
                    debug!(failures, "Broker still unreachable");
                }
                false
            }
        }
    }

    /// Health-check loop: steady interval while connected, exponential
    /// backoff with a ceiling while probing for reconnection.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.health_check_interval, "Starting broker health checks");

        loop {
            let delay = if self.is_available() {
                self.health_check_interval
            } else {
                let failures = self.consecutive_failures.load(Ordering::SeqCst);
                next_delay(failures, &self.reconnect_backoff)
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.check_now().await;
                }
                _ = shutdown.changed() => {
                    info!("Health check loop stopped");
                    return;
                }
            }
        }
    }
}
