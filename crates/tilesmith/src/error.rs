use std::path::PathBuf;
use thiserror::Error;

use crate::identity::TileId;

#[derive(Error, Debug)]
pub enum TilesmithError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tile index error: {0}")]
    Index(#[from] IndexError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Tiles not ready for {tile_id}")]
    NotReady { tile_id: TileId },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to read tile index '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Tile index '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write tile index '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize tile index: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised while downloading a source image.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid source URL '{0}'")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Download timed out")]
    Timeout,

    #[error("Failed to write download '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(error.to_string())
        }
    }
}

/// Errors raised by the external imaging toolchain.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{tool} not found (tried: {tried}). Install GDAL, e.g. `apt install gdal-bin` or `brew install gdal`")]
    NotInstalled { tool: String, tried: String },

    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with code {code}: {diagnostics}")]
    Failed {
        tool: String,
        code: i32,
        diagnostics: String,
    },

    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("Unexpected output from {tool}: {output}")]
    UnparseableOutput { tool: String, output: String },

    #[error("{tool} cannot write '{format}' tiles")]
    UnsupportedFormat { tool: String, format: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Job runner is shutting down")]
    ShutDown,

    #[error("No async runtime available to run background jobs")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, TilesmithError>;
