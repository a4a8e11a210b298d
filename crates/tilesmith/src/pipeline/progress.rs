use std::sync::Arc;

use crate::identity::TileId;
use crate::status::{JobStatusTable, Stage, StatusUpdate};

/// Events emitted by the pipeline during a run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Stage {
        stage: Stage,
        percentage: u8,
        message: String,
    },
    Percentage(u8),
    Completed {
        message: String,
    },
    Failed {
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Writes pipeline events into the job status table.
pub struct StatusProgress {
    tile_id: TileId,
    table: Arc<JobStatusTable>,
}

impl StatusProgress {
    pub fn new(tile_id: TileId, table: Arc<JobStatusTable>) -> Self {
        Self { tile_id, table }
    }
}

impl ProgressReporter for StatusProgress {
    fn report(&self, event: ProgressEvent) {
        let update = match event {
            ProgressEvent::Stage {
                stage,
                percentage,
                message,
            } => StatusUpdate::stage(stage, percentage, message),
            ProgressEvent::Percentage(percentage) => StatusUpdate::percentage(percentage),
            ProgressEvent::Completed { message } => StatusUpdate::completed(message),
            ProgressEvent::Failed { error } => StatusUpdate::failed(error),
        };

        if self.table.update_in_place(&self.tile_id, update).is_none() {
            log::debug!("No status entry for {}, progress dropped", self.tile_id);
        }
    }
}
