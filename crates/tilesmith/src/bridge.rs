//! Callback seam back to whatever owns the dataset that requested tiles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::identity::TileId;
use crate::index::TileSetRecord;
use crate::urls;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetOutcome {
    Ready,
    Failed,
}

/// Where a finished tile set can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileDescriptor {
    pub tile_id: TileId,
    pub url_template: String,
    pub thumbnail_url: String,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl TileDescriptor {
    pub fn from_record(record: &TileSetRecord, base_url: &str, extension: &str) -> Self {
        Self {
            tile_id: record.tile_id.clone(),
            url_template: urls::tile_url_template(base_url, &record.tile_id, extension),
            thumbnail_url: urls::thumbnail_url(base_url, &record.tile_id, extension),
            min_zoom: record.min_zoom,
            max_zoom: record.max_zoom,
        }
    }
}

/// Notified once per run that reaches a terminal state, for runs whose
/// metadata carried a dataset id.
///
/// Implementations own their error handling; the pipeline does not retry.
#[async_trait]
pub trait DatasetStatusBridge: Send + Sync {
    async fn on_job_terminal(
        &self,
        dataset_id: &str,
        outcome: DatasetOutcome,
        tiles: Option<&TileDescriptor>,
    );
}

/// Bridge that ignores every notification.
pub struct NoopBridge;

#[async_trait]
impl DatasetStatusBridge for NoopBridge {
    async fn on_job_terminal(
        &self,
        _dataset_id: &str,
        _outcome: DatasetOutcome,
        _tiles: Option<&TileDescriptor>,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::identifier_for;
    use crate::index::Metadata;

    #[test]
    fn test_descriptor_from_record() {
        let id = identifier_for("https://example.com/galaxy.tif");
        let record = TileSetRecord::completed(
            id.clone(),
            "https://example.com/galaxy.tif",
            id.to_string(),
            0,
            9,
            Metadata::new(),
        );

        let descriptor = TileDescriptor::from_record(&record, "http://localhost:8000", "png");
        assert_eq!(descriptor.max_zoom, 9);
        assert_eq!(
            descriptor.url_template,
            format!("http://localhost:8000/tiles/{}/{{z}}/{{x}}/{{y}}.png", id)
        );
        assert!(descriptor.thumbnail_url.ends_with("/0/0/0.png"));
    }

    #[test]
    fn test_outcome_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DatasetOutcome::Ready).unwrap(),
            "\"ready\""
        );
    }
}
