use crate::error::HandlerError;

use super::JobId;

/// Result of an enqueue call.
///
/// On the asynchronous path the handle carries the persisted job id. In
/// degraded (fallback) mode the handler ran synchronously in the caller's
/// task and the handle carries its direct outcome; no job record exists.
#[derive(Debug)]
pub enum JobHandle {
    /// Job was persisted to the broker for asynchronous processing
    Enqueued { job_id: JobId },

    /// Handler was executed inline because the broker was unavailable
    Inline { result: Result<(), HandlerError> },
}

impl JobHandle {
    /// The persisted job id, if the asynchronous path was taken
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::Enqueued { job_id } => Some(job_id),
            Self::Inline { .. } => None,
        }
    }

    /// True if the handler was executed synchronously in fallback mode
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }

    /// The inline handler outcome, if fallback mode was used
    pub fn inline_result(&self) -> Option<&Result<(), HandlerError>> {
        match self {
            Self::Inline { result } => Some(result),
            Self::Enqueued { .. } => None,
        }
    }
}
