use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_tiles_directory")]
    pub tiles_directory: String,
    #[serde(default = "default_downloads_directory")]
    pub downloads_directory: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_tile_format")]
    pub tile_format: String,
    #[serde(default = "default_max_zoom_cap")]
    pub max_zoom_cap: u8,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_processes")]
    pub processes: usize,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            tiles_directory: default_tiles_directory(),
            downloads_directory: default_downloads_directory(),
            base_url: default_base_url(),
            tile_format: default_tile_format(),
            max_zoom_cap: default_max_zoom_cap(),
            tile_size: default_tile_size(),
            poll_interval_ms: default_poll_interval_ms(),
            processes: default_processes(),
            timeouts: TimeoutConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

fn data_subdirectory(name: &str, fallback: &str) -> String {
    dirs::data_dir()
        .map(|dir| dir.join("tilesmith").join(name))
        .unwrap_or_else(|| PathBuf::from(fallback))
        .to_string_lossy()
        .to_string()
}

fn default_tiles_directory() -> String {
    data_subdirectory("tiles", "./tiles_cache")
}

fn default_downloads_directory() -> String {
    data_subdirectory("downloads", "./downloads")
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

/// Tile file extensions the tiler can write, with its `--tiledriver` name.
pub const TILE_FORMATS: [(&str, &str); 3] = [("png", "PNG"), ("jpg", "JPEG"), ("webp", "WEBP")];

/// `gdal2tiles` driver that writes files with the `format` extension.
pub fn tile_driver(format: &str) -> Option<&'static str> {
    TILE_FORMATS
        .iter()
        .find(|(ext, _)| *ext == format)
        .map(|(_, driver)| *driver)
}

fn default_tile_format() -> String {
    "png".to_string()
}

fn default_max_zoom_cap() -> u8 {
    12
}

fn default_tile_size() -> u32 {
    256
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_processes() -> usize {
    num_cpus::get()
}

/// Wall-clock limits, in seconds, for each blocking operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_download_secs")]
    pub download_secs: u64,
    #[serde(default = "default_georeference_secs")]
    pub georeference_secs: u64,
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    #[serde(default = "default_tiling_secs")]
    pub tiling_secs: u64,
}

fn default_connect_secs() -> u64 {
    60
}

fn default_download_secs() -> u64 {
    1800
}

fn default_georeference_secs() -> u64 {
    600
}

fn default_probe_secs() -> u64 {
    60
}

fn default_tiling_secs() -> u64 {
    3600
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            download_secs: default_download_secs(),
            georeference_secs: default_georeference_secs(),
            probe_secs: default_probe_secs(),
            tiling_secs: default_tiling_secs(),
        }
    }
}

/// Candidate commands for each external tool, tried in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_translate")]
    pub translate: Vec<String>,
    #[serde(default = "default_info")]
    pub info: Vec<String>,
    #[serde(default = "default_tiler")]
    pub tiler: Vec<String>,
}

fn default_translate() -> Vec<String> {
    vec!["gdal_translate".to_string()]
}

fn default_info() -> Vec<String> {
    vec!["gdalinfo".to_string()]
}

fn default_tiler() -> Vec<String> {
    vec![
        "gdal2tiles.py".to_string(),
        "gdal2tiles".to_string(),
        "/usr/local/bin/gdal2tiles.py".to_string(),
        "/opt/homebrew/bin/gdal2tiles.py".to_string(),
    ]
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            translate: default_translate(),
            info: default_info(),
            tiler: default_tiler(),
        }
    }
}
