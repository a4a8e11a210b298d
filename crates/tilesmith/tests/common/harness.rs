//! Test harness for isolated service execution.
//!
//! `TestHarness` owns temp tiles/downloads directories and the fakes, and
//! builds `TileService` instances over them. Building a second service over
//! the same harness simulates a process restart.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tilesmith::{
    identifier_for, Config, JobStatus, PipelineConfig, TileId, TileService,
};

use super::fakes::{FakeFetcher, FakeToolchain, RecordingBridge};

pub const BASE_URL: &str = "http://tiles.test";

pub struct TestHarness {
    temp_dir: TempDir,
    pub tiles_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub fetcher: Arc<FakeFetcher>,
    pub toolchain: Arc<FakeToolchain>,
    pub bridge: Arc<RecordingBridge>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_fakes(FakeFetcher::new(), FakeToolchain::default())
    }

    pub fn with_fakes(fetcher: FakeFetcher, toolchain: FakeToolchain) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let tiles_dir = temp_dir.path().join("tiles_cache");
        let downloads_dir = temp_dir.path().join("downloads");

        Self {
            temp_dir,
            tiles_dir,
            downloads_dir,
            fetcher: Arc::new(fetcher),
            toolchain: Arc::new(toolchain),
            bridge: Arc::new(RecordingBridge::default()),
        }
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.tiles_directory = self.tiles_dir.to_string_lossy().to_string();
        config.downloads_directory = self.downloads_dir.to_string_lossy().to_string();
        config.base_url = BASE_URL.to_string();
        config.poll_interval_ms = 10;
        config.processes = 1;
        config
    }

    /// Builds a service over the harness directories. Requires a runtime.
    pub fn service(&self) -> TileService {
        TileService::with_components(
            PipelineConfig::from_config(&self.config()),
            self.fetcher.clone(),
            self.toolchain.clone(),
            self.bridge.clone(),
        )
        .expect("Failed to build tile service")
    }

    pub fn raw_path(&self, id: &TileId, ext: &str) -> PathBuf {
        self.downloads_dir.join(format!("{}.{}", id, ext))
    }

    pub fn georef_path(&self, id: &TileId) -> PathBuf {
        self.downloads_dir.join(format!("{}_georef.tif", id))
    }

    pub fn tiles_path(&self, id: &TileId) -> PathBuf {
        self.tiles_dir.join(id.as_str())
    }

    /// Pre-creates the download and georeference checkpoints for `url`.
    pub fn seed_checkpoints(&self, url: &str, ext: &str) -> TileId {
        let id = identifier_for(url);
        std::fs::create_dir_all(&self.downloads_dir).expect("Failed to create downloads dir");
        std::fs::write(self.raw_path(&id, ext), b"raw").expect("Failed to seed raw");
        std::fs::write(self.georef_path(&id), b"georef").expect("Failed to seed georef");
        id
    }

    /// Lists every file left in the downloads directory.
    pub fn download_files(&self) -> Vec<String> {
        match std::fs::read_dir(&self.downloads_dir) {
            Ok(entries) => {
                let mut names: Vec<String> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }
}

/// Polls until `id` reaches a terminal state.
pub async fn wait_for_terminal(service: &TileService, id: &TileId) -> JobStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = service.status(id) {
            if status.is_finished() {
                return status;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} did not finish in time",
            id
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
