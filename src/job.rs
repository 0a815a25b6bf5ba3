use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::backoff::BackoffPolicy;
use crate::error::HandlerError;

/// Trait for defining jobs that can be processed by the queue.
///
/// A job type is a typed payload with compile-time identification and a
/// classified execution outcome: a `Transient` error schedules a retry per
/// the backoff policy while attempts remain, a `Permanent` error fails the
/// job immediately. Payloads should carry references (entity ids, blob
/// keys), not bulk data.
///
/// Handlers must tolerate re-execution: delivery is at-least-once, and a
/// worker crash mid-attempt means the job is leased out again after the
/// visibility timeout.
#[async_trait]
pub trait Job: Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Job type identifier for dispatch
    const JOB_TYPE: &'static str;

    /// Maximum number of handler invocations before permanent failure;
    /// `None` defers to the queue's default
    fn max_attempts() -> Option<u32> {
        None
    }

    /// Backoff policy applied between retry attempts; `None` defers to the
    /// queue's default
    fn backoff() -> Option<BackoffPolicy> {
        None
    }

    /// Optional per-attempt execution timeout; a timeout counts as a
    /// transient failure
    fn timeout() -> Option<Duration> {
        None
    }

    /// Execute the job
    async fn run(&self) -> Result<(), HandlerError>;
}
