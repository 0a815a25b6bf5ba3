//! # taskmill: Background Job Queue and Worker Subsystem
//!
//! **Lease-based job processing with synchronous fallback**
//!
//! taskmill decouples slow or failure-prone work (email dispatch, media
//! processing, webhook delivery) from request handling:
//!
//! - **Named queues with policies**: per-queue concurrency, rate limits,
//!   retention windows, and retry defaults, all fixed at startup
//! - **Lease semantics**: workers hold a lease token per attempt; a crashed
//!   worker's job is reclaimed by the reaper and retried, and stale acks are
//!   rejected
//! - **At-most-`max_attempts` retries**: transient failures back off
//!   (fixed, linear, or exponential with jitter) before re-entering the queue
//! - **Synchronous fallback**: when the broker is unreachable, enqueues run
//!   the handler inline in the caller's task instead of losing the job
//! - **Type-safe handlers**: jobs are plain serde types implementing [`Job`];
//!   dynamic dispatch happens only at the job-type boundary
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskmill::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct SendEmail {
//!     to: String,
//!     subject: String,
//! }
//!
//! #[async_trait]
//! impl Job for SendEmail {
//!     const JOB_TYPE: &'static str = "send_email";
//!
//!     async fn run(&self) -> Result<(), HandlerError> {
//!         // deliver the email
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo() -> QueueResult<()> {
//! let manager = QueueManager::builder(ManagerConfig::default())
//!     .define_queue("mail", QueuePolicy::default().concurrency(4))
//!     .register::<SendEmail>("mail")?
//!     .build(Arc::new(MemoryBroker::new()));
//!
//! let runtime = manager.start().await?;
//!
//! let handle = manager
//!     .producer()
//!     .enqueue_job(
//!         "mail",
//!         &SendEmail { to: "a@b.c".into(), subject: "hi".into() },
//!         EnqueueOptions::default(),
//!     )
//!     .await?;
//! println!("enqueued: {:?}", handle.job_id());
//!
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod broker;
pub mod config;
pub mod error;
pub mod job;
pub mod manager;
pub mod monitor;
pub mod producer;
pub mod registry;
pub mod store;
pub mod types;
pub mod worker;

// Core API exports
pub use backoff::{next_delay, BackoffPolicy};
pub use broker::connection::ConnectionManager;
pub use broker::memory::MemoryBroker;
pub use broker::Broker;
pub use config::{ManagerConfig, QueuePolicy, RateLimit};
pub use error::{HandlerError, QueueError, QueueResult};
pub use job::Job;
pub use manager::{QueueManager, QueueManagerBuilder, RuntimeHandle};
pub use monitor::{HealthReport, Monitor, WorkerHealth};
pub use producer::Producer;
pub use registry::{HandlerRegistry, QueueRegistry};
pub use store::JobStore;
pub use types::{
    EnqueueOptions, JobEvent, JobHandle, JobId, JobMessage, JobPriority, JobRecord, JobStage,
    JobStatus, LeaseToken, LeasedJob, QueueCounts, WorkerId,
};
pub use worker::{HeartbeatBoard, WorkerPool, WorkerPoolHandle};

/// Everything an application needs to define jobs and run the subsystem
pub mod prelude {
    pub use crate::{
        BackoffPolicy, Broker, EnqueueOptions, HandlerError, JobHandle, JobId, JobPriority,
        JobStage, JobStatus, ManagerConfig, MemoryBroker, QueueError, QueueManager, QueuePolicy,
        QueueResult, RateLimit,
    };

    pub use crate::Job;

    pub use async_trait::async_trait;
}
