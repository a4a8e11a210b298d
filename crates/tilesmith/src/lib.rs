pub mod bridge;
pub mod config;
pub mod error;
pub mod identity;
pub mod index;
pub mod logging;
pub mod pipeline;
pub mod sanitize;
pub mod service;
pub mod status;
pub mod urls;
pub mod worker;
pub mod zoom;

pub use bridge::{DatasetOutcome, DatasetStatusBridge, NoopBridge, TileDescriptor};
pub use config::{load_config, Config};
pub use error::{
    ConfigError, FetchError, IndexError, Result, TilesmithError, ToolError, WorkerError,
};
pub use identity::{identifier_for, TileId};
pub use index::{Metadata, TileIndex, TileSetRecord, TileSetStatus};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError};
pub use service::{SubmitOutcome, TileService, TileStatusView};
pub use status::{JobProgressEvent, JobState, JobStatus, JobStatusTable, Stage};
pub use worker::JobRunner;
