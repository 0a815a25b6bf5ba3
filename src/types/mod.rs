pub mod events;
pub mod handle;
pub mod ids;
pub mod message;
pub mod priority;
pub mod record;

pub use events::JobEvent;
pub use handle::JobHandle;
pub use ids::{JobId, LeaseToken, WorkerId};
pub use message::{EnqueueOptions, JobMessage};
pub use priority::JobPriority;
pub use record::{JobRecord, JobStage, JobStatus, LeasedJob, QueueCounts};
