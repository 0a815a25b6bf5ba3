use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::backoff::BackoffPolicy;
use crate::config::QueuePolicy;
use crate::error::{HandlerError, QueueError, QueueResult};
use crate::job::Job;

/// Static description of named queues and their policies.
///
/// Populated once at startup; jobs enqueued against an undefined queue fail
/// synchronously with `UnknownQueue`.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: HashMap<String, QueuePolicy>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
        }
    }

    /// Define a queue with the given policy. Redefinition replaces the
    /// previous policy; this only happens during startup wiring.
    pub fn define(&mut self, name: impl Into<String>, policy: QueuePolicy) {
        self.queues.insert(name.into(), policy);
    }

    /// Look up a queue's policy
    pub fn policy(&self, name: &str) -> QueueResult<&QueuePolicy> {
        self.queues
            .get(name)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()))
    }

    /// Check whether a queue is defined
    pub fn contains(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// All defined queue names
    pub fn queue_names(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }
}

/// Type-erased job handler for runtime dispatch
#[async_trait]
pub trait ErasedHandler: Send + Sync {
    /// Validate a raw payload by attempting a typed decode; does not execute
    fn validate(&self, payload: &[u8]) -> Result<(), String>;

    /// Deserialize the payload and run the handler
    async fn call(&self, payload: &[u8]) -> Result<(), HandlerError>;

    /// Get the job type this handler processes
    fn job_type(&self) -> &'static str;

    /// Maximum attempts declared by the job type, if any
    fn max_attempts(&self) -> Option<u32>;

    /// Backoff policy declared by the job type, if any
    fn backoff(&self) -> Option<BackoffPolicy>;

    /// Optional per-attempt timeout declared by the job type
    fn timeout(&self) -> Option<Duration>;
}

/// Concrete handler implementation for a registered job type
struct TypedHandler<J: Job> {
    _phantom: std::marker::PhantomData<fn() -> J>,
}

impl<J: Job> TypedHandler<J> {
    fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<J: Job> ErasedHandler for TypedHandler<J> {
    fn validate(&self, payload: &[u8]) -> Result<(), String> {
        serde_json::from_slice::<J>(payload)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn call(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let job: J = serde_json::from_slice(payload)
            .map_err(|e| HandlerError::permanent(format!("Failed to deserialize job: {}", e)))?;
        job.run().await
    }

    fn job_type(&self) -> &'static str {
        J::JOB_TYPE
    }

    fn max_attempts(&self) -> Option<u32> {
        J::max_attempts()
    }

    fn backoff(&self) -> Option<BackoffPolicy> {
        J::backoff()
    }

    fn timeout(&self) -> Option<Duration> {
        J::timeout()
    }
}

/// Registry of job handlers keyed by `(queue, job_type)`.
///
/// One registry serves both sides: the producer validates payloads against it
/// (and invokes handlers inline in fallback mode), and worker loops dispatch
/// through it.
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a job type on a queue
    pub fn register<J: Job>(&mut self, queue: impl Into<String>) -> QueueResult<()> {
        let key = (queue.into(), J::JOB_TYPE.to_string());
        if self.handlers.contains_key(&key) {
            return Err(QueueError::DuplicateHandler(J::JOB_TYPE.to_string()));
        }
        self.handlers.insert(key, Arc::new(TypedHandler::<J>::new()));
        Ok(())
    }

    /// Look up the handler for a `(queue, job_type)` pair
    pub fn handler(&self, queue: &str, job_type: &str) -> QueueResult<Arc<dyn ErasedHandler>> {
        self.handlers
            .get(&(queue.to_string(), job_type.to_string()))
            .cloned()
            .ok_or_else(|| QueueError::UnknownJobType(job_type.to_string()))
    }

    /// Validate a raw JSON payload against the registered type.
    ///
    /// Fails with `Validation` if the payload does not decode; no job is
    /// ever created for an invalid payload.
    pub fn validate(&self, queue: &str, job_type: &str, payload: &Value) -> QueueResult<Vec<u8>> {
        let handler = self.handler(queue, job_type)?;
        let bytes = serde_json::to_vec(payload)?;
        handler
            .validate(&bytes)
            .map_err(|reason| QueueError::Validation {
                job_type: job_type.to_string(),
                reason,
            })?;
        Ok(bytes)
    }

    /// Check if a job type is registered on a queue
    pub fn is_registered(&self, queue: &str, job_type: &str) -> bool {
        self.handlers
            .contains_key(&(queue.to_string(), job_type.to_string()))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct SendEmail {
        to: String,
        template: String,
    }

    #[async_trait]
    impl Job for SendEmail {
        const JOB_TYPE: &'static str = "send_email";

        async fn run(&self) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn registers_and_validates() {
        let mut registry = HandlerRegistry::new();
        registry.register::<SendEmail>("mail").unwrap();

        assert!(registry.is_registered("mail", "send_email"));
        assert!(!registry.is_registered("other", "send_email"));

        let valid = json!({ "to": "a@b.c", "template": "welcome" });
        assert!(registry.validate("mail", "send_email", &valid).is_ok());

        let invalid = json!({ "to": 42 });
        let err = registry.validate("mail", "send_email", &invalid).unwrap_err();
        assert!(matches!(err, QueueError::Validation { .. }));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = HandlerRegistry::new();
        registry.register::<SendEmail>("mail").unwrap();
        let err = registry.register::<SendEmail>("mail").unwrap_err();
        assert!(matches!(err, QueueError::DuplicateHandler(_)));
    }

    #[test]
    fn unknown_job_type_is_reported() {
        let registry = HandlerRegistry::new();
        let err = registry
            .validate("mail", "render_pdf", &json!({}))
            .unwrap_err();
        assert!(matches!(err, QueueError::UnknownJobType(_)));
    }

    #[test]
    fn queue_registry_lookup() {
        let mut queues = QueueRegistry::new();
        queues.define("mail", QueuePolicy::default());

        assert!(queues.policy("mail").is_ok());
        assert!(matches!(
            queues.policy("missing"),
            Err(QueueError::UnknownQueue(_))
        ));
    }

    #[tokio::test]
    async fn erased_call_round_trips() {
        let mut registry = HandlerRegistry::new();
        registry.register::<SendEmail>("mail").unwrap();

        let handler = registry.handler("mail", "send_email").unwrap();
        let payload = serde_json::to_vec(&json!({ "to": "a@b.c", "template": "t" })).unwrap();
        assert!(handler.call(&payload).await.is_ok());

        let err = handler.call(b"not json").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
