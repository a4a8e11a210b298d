use std::path::PathBuf;
use std::time::Duration;

use crate::config::schema::ToolsConfig;
use crate::config::Config;

/// Runtime settings for the pipeline, flattened from the file config.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub tiles_directory: PathBuf,
    pub downloads_directory: PathBuf,
    pub base_url: String,
    pub tile_format: String,
    pub tile_size: u32,
    pub max_zoom_cap: u8,
    pub processes: usize,
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub download_timeout: Duration,
    pub georeference_timeout: Duration,
    pub probe_timeout: Duration,
    pub tiling_timeout: Duration,
    pub tools: ToolsConfig,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tiles_directory: PathBuf::from(&config.tiles_directory),
            downloads_directory: PathBuf::from(&config.downloads_directory),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tile_format: config.tile_format.clone(),
            tile_size: config.tile_size,
            max_zoom_cap: config.max_zoom_cap,
            processes: config.processes.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            download_timeout: Duration::from_secs(config.timeouts.download_secs),
            georeference_timeout: Duration::from_secs(config.timeouts.georeference_secs),
            probe_timeout: Duration::from_secs(config.timeouts.probe_secs),
            tiling_timeout: Duration::from_secs(config.timeouts.tiling_secs),
            tools: config.tools.clone(),
        }
    }
}
