use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::identity::{identifier_for, TileId};
use crate::index::{Metadata, DATASET_ID_KEY};
use crate::status::Stage;

use super::config::PipelineConfig;

const FALLBACK_EXTENSION: &str = "jpg";

/// A single accepted request to build a tile pyramid.
#[derive(Debug, Clone)]
pub struct TileJob {
    pub tile_id: TileId,
    pub source_url: String,
    pub metadata: Metadata,
    /// Distinguishes separate attempts for the same identifier in logs.
    pub run_id: Uuid,
}

impl TileJob {
    pub fn new(source_url: &str, metadata: Metadata) -> Self {
        let source_url = source_url.trim().to_string();
        Self {
            tile_id: identifier_for(&source_url),
            source_url,
            metadata,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn dataset_id(&self) -> Option<&str> {
        self.metadata.get(DATASET_ID_KEY).map(String::as_str)
    }
}

/// On-disk locations of every artifact a job produces.
///
/// Checkpoint paths are only ever created by renaming the matching staging
/// path, so their presence means the stage finished.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub raw: PathBuf,
    pub raw_staging: PathBuf,
    pub georef: PathBuf,
    pub georef_staging: PathBuf,
    pub tiles: PathBuf,
    pub tiles_staging: PathBuf,
}

impl Artifacts {
    pub fn for_job(job: &TileJob, config: &PipelineConfig) -> Self {
        let id = job.tile_id.as_str();
        let ext = source_extension(&job.source_url);
        let downloads = &config.downloads_directory;
        let tiles = &config.tiles_directory;

        Self {
            raw: downloads.join(format!("{}.{}", id, ext)),
            raw_staging: downloads.join(format!("{}.{}.part", id, ext)),
            georef: downloads.join(format!("{}_georef.tif", id)),
            georef_staging: downloads.join(format!("{}_georef.part.tif", id)),
            tiles: tiles.join(id),
            tiles_staging: tiles.join(format!("{}.partial", id)),
        }
    }

    pub fn staging_paths(&self) -> [&Path; 3] {
        [&self.raw_staging, &self.georef_staging, &self.tiles_staging]
    }
}

/// File extension for the raw download.
///
/// Uses the URL path's extension when it names an image type, `jpg` otherwise.
pub fn source_extension(source_url: &str) -> String {
    let path = match reqwest::Url::parse(source_url) {
        Ok(url) => url.path().to_string(),
        Err(_) => source_url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };

    let ext = Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext {
        Some(ext)
            if mime_guess::from_ext(&ext)
                .first()
                .map(|mime| mime.type_() == mime_guess::mime::IMAGE)
                .unwrap_or(false) =>
        {
            ext
        }
        _ => FALLBACK_EXTENSION.to_string(),
    }
}

/// Per-run scratch state filled in as stages complete.
pub struct PipelineContext {
    pub job: TileJob,
    pub artifacts: Artifacts,

    // Last stage entered
    pub stage: Stage,

    // Stage 3 target, from the dimension probe
    pub target_max_zoom: Option<u8>,

    // Stage 4 result
    pub zoom_range: Option<(u8, u8)>,

    // Stages skipped because their checkpoint already existed
    pub skipped: Vec<&'static str>,
}

impl PipelineContext {
    pub fn new(job: TileJob, config: &PipelineConfig) -> Self {
        let artifacts = Artifacts::for_job(&job, config);
        Self {
            job,
            artifacts,
            stage: Stage::Queued,
            target_max_zoom: None,
            zoom_range: None,
            skipped: Vec::new(),
        }
    }
}
