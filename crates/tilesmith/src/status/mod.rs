//! Transient job status tracking and progress broadcasting.

pub mod events;
pub mod job;
pub mod table;

pub use events::{JobProgressBroadcaster, JobProgressEvent};
pub use job::{JobState, JobStatus, Stage, StatusUpdate};
pub use table::JobStatusTable;
