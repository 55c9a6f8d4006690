//! Domain model (ids, job record, status lifecycle, queue task).

pub mod ids;
pub mod job;
pub mod task;

pub use ids::{JobId, ParseJobIdError};
pub use job::{AnalysisJob, JobStatus, JobStatusView, NewJob, TransitionFields};
pub use task::JobTask;
