pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod progress;
pub mod runner;
pub mod toolchain;

pub use config::PipelineConfig;
pub use context::{Artifacts, PipelineContext, TileJob};
pub use error::PipelineError;
pub use fetch::{ByteProgress, HttpFetcher, SourceFetcher};
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter, StatusProgress};
pub use runner::{Admission, Pipeline};
pub use toolchain::{GdalToolchain, RasterToolchain};
