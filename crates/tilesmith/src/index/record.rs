use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::TileId;

/// Caller-supplied metadata, opaque to the pipeline.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key carrying the originating dataset's identifier.
pub const DATASET_ID_KEY: &str = "dataset_id";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TileSetStatus {
    Completed,
    Failed,
}

/// A tile set recorded in the persisted index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TileSetRecord {
    pub tile_id: TileId,
    pub source_url: String,
    /// Tile directory relative to the tiles root.
    pub tiles_path: String,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub status: TileSetStatus,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl TileSetRecord {
    pub fn completed(
        tile_id: TileId,
        source_url: &str,
        tiles_path: String,
        min_zoom: u8,
        max_zoom: u8,
        metadata: Metadata,
    ) -> Self {
        Self {
            tile_id,
            source_url: source_url.to_string(),
            tiles_path,
            min_zoom,
            max_zoom,
            status: TileSetStatus::Completed,
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TileSetStatus::Completed
    }

    /// The dataset this tile set was produced for, if any.
    pub fn dataset_id(&self) -> Option<&str> {
        self.metadata.get(DATASET_ID_KEY).map(String::as_str)
    }
}
