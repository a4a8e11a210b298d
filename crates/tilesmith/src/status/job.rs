use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::TileId;

/// Overall state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    /// Queued and processing jobs block a duplicate run.
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Queued | JobState::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Processing => write!(f, "processing"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Pipeline stage, finer-grained than [`JobState`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Downloading,
    Georeferencing,
    GeneratingTiles,
    Finalizing,
    Completed,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Queued => write!(f, "Queued"),
            Stage::Downloading => write!(f, "Downloading"),
            Stage::Georeferencing => write!(f, "Georeferencing"),
            Stage::GeneratingTiles => write!(f, "Generating tiles"),
            Stage::Finalizing => write!(f, "Finalizing"),
            Stage::Completed => write!(f, "Completed"),
            Stage::Failed => write!(f, "Failed"),
        }
    }
}

/// Current status of a queued, running or finished job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub tile_id: TileId,
    pub source_url: String,
    pub status: JobState,
    pub stage: Stage,
    /// 0-100, never decreasing within one run.
    pub percentage: u8,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    /// Status of a freshly accepted job.
    pub fn queued(tile_id: TileId, source_url: &str) -> Self {
        let now = Utc::now();
        Self {
            tile_id,
            source_url: source_url.to_string(),
            status: JobState::Queued,
            stage: Stage::Queued,
            percentage: 0,
            message: "Job queued for processing".to_string(),
            started_at: now,
            updated_at: now,
            failed_at: None,
            error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a partial update in place.
    pub fn apply(&mut self, update: StatusUpdate) {
        let now = Utc::now();

        if let Some(state) = update.status {
            self.status = state;
            if state == JobState::Failed {
                self.failed_at = Some(now);
            }
        }
        if let Some(stage) = update.stage {
            self.stage = stage;
        }
        if let Some(percentage) = update.percentage {
            self.percentage = self.percentage.max(percentage.min(100));
        }
        if self.status == JobState::Completed {
            self.percentage = 100;
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if update.error.is_some() {
            self.error = update.error;
        }

        self.updated_at = now;
    }
}

/// Partial update to a [`JobStatus`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub status: Option<JobState>,
    pub stage: Option<Stage>,
    pub percentage: Option<u8>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl StatusUpdate {
    /// Entering a stage of a running job.
    pub fn stage(stage: Stage, percentage: u8, message: impl Into<String>) -> Self {
        Self {
            status: Some(JobState::Processing),
            stage: Some(stage),
            percentage: Some(percentage),
            message: Some(message.into()),
            error: None,
        }
    }

    /// Progress within the current stage.
    pub fn percentage(percentage: u8) -> Self {
        Self {
            percentage: Some(percentage),
            ..Self::default()
        }
    }

    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobState::Completed),
            stage: Some(Stage::Completed),
            percentage: Some(100),
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobState::Failed),
            stage: Some(Stage::Failed),
            percentage: None,
            message: Some("Processing failed".to_string()),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::identifier_for;

    fn queued() -> JobStatus {
        JobStatus::queued(identifier_for("https://example.com/a.tif"), "https://example.com/a.tif")
    }

    #[test]
    fn test_queued_status() {
        let status = queued();
        assert_eq!(status.status, JobState::Queued);
        assert_eq!(status.stage, Stage::Queued);
        assert_eq!(status.percentage, 0);
        assert!(status.is_active());
        assert!(!status.is_finished());
    }

    #[test]
    fn test_percentage_never_decreases() {
        let mut status = queued();
        status.apply(StatusUpdate::stage(Stage::GeneratingTiles, 40, "Tiling"));
        status.apply(StatusUpdate::percentage(70));
        status.apply(StatusUpdate::percentage(55));

        assert_eq!(status.percentage, 70);
        assert_eq!(status.stage, Stage::GeneratingTiles);
        assert_eq!(status.message, "Tiling");
    }

    #[test]
    fn test_percentage_capped_at_100() {
        let mut status = queued();
        status.apply(StatusUpdate::percentage(250));
        assert_eq!(status.percentage, 100);
    }

    #[test]
    fn test_failed_sets_timestamp_and_error() {
        let mut status = queued();
        status.apply(StatusUpdate::stage(Stage::Downloading, 5, "Downloading"));
        status.apply(StatusUpdate::failed("HTTP 404 for URL: https://example.com/a.tif"));

        assert_eq!(status.status, JobState::Failed);
        assert_eq!(status.stage, Stage::Failed);
        assert_eq!(status.percentage, 5);
        assert!(status.failed_at.is_some());
        assert!(status.error.as_ref().unwrap().contains("404"));
        assert!(status.is_finished());
    }

    #[test]
    fn test_completed_forces_full_percentage() {
        let mut status = queued();
        status.apply(StatusUpdate::completed("Done"));
        assert_eq!(status.percentage, 100);
        assert_eq!(status.stage, Stage::Completed);
        assert!(status.failed_at.is_none());
    }

    #[test]
    fn test_serializes_snake_case_names() {
        let mut status = queued();
        status.apply(StatusUpdate::stage(Stage::GeneratingTiles, 40, "Tiling"));
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["status"], "processing");
        assert_eq!(json["stage"], "generating_tiles");
        assert!(json.get("error").is_none());
    }
}
