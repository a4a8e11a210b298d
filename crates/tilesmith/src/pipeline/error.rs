use std::path::PathBuf;

use thiserror::Error;

use crate::error::{FetchError, IndexError, ToolError};
use crate::status::Stage;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Download failed: {0}")]
    Download(#[from] FetchError),

    #[error("Georeferencing failed: {0}")]
    Georeference(ToolError),

    #[error("Could not read image dimensions: {0}")]
    DimensionProbe(ToolError),

    #[error("Tile generation failed: {0}")]
    TileGeneration(ToolError),

    #[error("Tiler produced no zoom levels in {}", path.display())]
    EmptyOutput { path: PathBuf },

    #[error("Filesystem error at '{}': {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to record tile set: {0}")]
    Index(#[from] IndexError),

    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// The stage that was running when the error occurred.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Download(_) => Stage::Downloading,
            PipelineError::Georeference(_) => Stage::Georeferencing,
            PipelineError::DimensionProbe(_) | PipelineError::TileGeneration(_) => {
                Stage::GeneratingTiles
            }
            PipelineError::EmptyOutput { .. } | PipelineError::Index(_) => Stage::Finalizing,
            PipelineError::Filesystem { .. } | PipelineError::Task(_) => Stage::Failed,
        }
    }
}
