//! Job progress events for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::identity::TileId;
use crate::status::job::{JobState, JobStatus, Stage};

/// Snapshot of a job published on every status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgressEvent {
    pub tile_id: TileId,
    pub status: JobState,
    pub stage: Stage,
    pub percentage: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&JobStatus> for JobProgressEvent {
    fn from(status: &JobStatus) -> Self {
        Self {
            tile_id: status.tile_id.clone(),
            status: status.status,
            stage: status.stage,
            percentage: status.percentage,
            message: status.message.clone(),
            error: status.error.clone(),
            timestamp: status.updated_at,
        }
    }
}

/// Broadcasts job progress events to any number of subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
