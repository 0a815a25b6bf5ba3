use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::broker::connection::ConnectionManager;
use crate::broker::Broker;
use crate::config::{ManagerConfig, QueuePolicy};
use crate::error::{QueueError, QueueResult};
use crate::job::Job;
use crate::monitor::Monitor;
use crate::producer::Producer;
use crate::registry::{HandlerRegistry, QueueRegistry};
use crate::store::JobStore;
use crate::worker::{HeartbeatBoard, WorkerPool, WorkerPoolHandle};

/// Builder for the queue manager: queues are defined and handlers registered
/// here, once, before anything runs.
pub struct QueueManagerBuilder {
    config: ManagerConfig,
    queues: QueueRegistry,
    handlers: HandlerRegistry,
}

impl QueueManagerBuilder {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            queues: QueueRegistry::new(),
            handlers: HandlerRegistry::new(),
        }
    }

    /// Define a named queue with its policy
    pub fn define_queue(mut self, name: impl Into<String>, policy: QueuePolicy) -> Self {
        self.queues.define(name, policy);
        self
    }

    /// Register a job type's handler on a queue
    pub fn register<J: Job>(mut self, queue: impl Into<String>) -> QueueResult<Self> {
        let queue = queue.into();
        if !self.queues.contains(&queue) {
            return Err(QueueError::UnknownQueue(queue));
        }
        self.handlers.register::<J>(queue)?;
        Ok(self)
    }

    /// Wire everything to the given broker
    pub fn build(self, broker: Arc<dyn Broker>) -> QueueManager {
        let queues = Arc::new(self.queues);
        let handlers = Arc::new(self.handlers);
        let connection = Arc::new(ConnectionManager::new(broker.clone(), &self.config));
        let heartbeats = Arc::new(HeartbeatBoard::new());

        let producer = Producer::new(queues.clone(), handlers.clone(), connection.clone());
        let store = JobStore::new(broker, queues.clone());
        let monitor = Monitor::new(
            queues.clone(),
            connection.clone(),
            heartbeats.clone(),
            &self.config,
        );

        QueueManager {
            config: self.config,
            queues,
            handlers,
            connection,
            heartbeats,
            producer,
            store,
            monitor,
        }
    }
}

/// Handle over the running background loops (health checks + worker pool)
pub struct RuntimeHandle {
    health_shutdown: watch::Sender<bool>,
    health_handle: JoinHandle<()>,
    workers: WorkerPoolHandle,
}

impl RuntimeHandle {
    /// Gracefully stop workers, maintenance loops, and health checks
    pub async fn shutdown(self) -> QueueResult<()> {
        self.workers.shutdown().await?;
        let _ = self.health_shutdown.send(true);
        self.health_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Health loop join error: {}", e)))?;
        Ok(())
    }
}

/// Explicit root object for the job subsystem, constructed once at startup
/// and passed by reference into application code. There is no hidden global
/// state; tests inject a fake or in-memory broker through the builder.
pub struct QueueManager {
    config: ManagerConfig,
    queues: Arc<QueueRegistry>,
    handlers: Arc<HandlerRegistry>,
    connection: Arc<ConnectionManager>,
    heartbeats: Arc<HeartbeatBoard>,
    producer: Producer,
    store: JobStore,
    monitor: Monitor,
}

impl QueueManager {
    pub fn builder(config: ManagerConfig) -> QueueManagerBuilder {
        QueueManagerBuilder::new(config)
    }

    /// Push per-queue rate limits to the broker and launch the health-check
    /// loop and worker pool.
    pub async fn start(&self) -> QueueResult<RuntimeHandle> {
        for queue in self.queues.queue_names() {
            let policy = self.queues.policy(&queue)?;
            self.connection
                .broker()
                .configure_queue(&queue, policy.rate_limit)
                .await?;
        }

        // Establish availability before the first enqueue
        self.connection.check_now().await;

        let (health_shutdown, health_rx) = watch::channel(false);
        let health_handle = tokio::spawn(self.connection.clone().run(health_rx));

        let workers = WorkerPool::start(
            self.queues.clone(),
            self.handlers.clone(),
            self.connection.clone(),
            self.heartbeats.clone(),
            self.config.clone(),
        );

        info!(queues = self.queues.queue_names().len(), "Queue manager started");

        Ok(RuntimeHandle {
            health_shutdown,
            health_handle,
            workers,
        })
    }

    /// Enqueue API
    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    /// Job lifecycle queries and cleanup
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Stats and health aggregation
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Broker connectivity state
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Runtime configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }
}
