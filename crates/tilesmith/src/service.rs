//! Entry points used by dataset-creation and status-polling callers.

use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;

use crate::bridge::DatasetStatusBridge;
use crate::config::{validate_config, Config};
use crate::error::{Result, TilesmithError};
use crate::identity::{identifier_for, TileId};
use crate::index::{Metadata, TileIndex, TileSetRecord};
use crate::pipeline::{
    Admission, GdalToolchain, HttpFetcher, Pipeline, PipelineConfig, RasterToolchain,
    SourceFetcher,
};
use crate::status::{JobProgressEvent, JobStatus, JobStatusTable, StatusUpdate};
use crate::urls;
use crate::worker::JobRunner;

/// What happened to a `submit_or_run` request.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Tiles already exist; no work was scheduled.
    Completed(TileSetRecord),
    /// A background run was started.
    Queued(TileId),
    /// A run for the same identifier is queued or processing.
    AlreadyInProgress(TileId),
}

impl SubmitOutcome {
    pub fn tile_id(&self) -> &TileId {
        match self {
            SubmitOutcome::Completed(record) => &record.tile_id,
            SubmitOutcome::Queued(id) | SubmitOutcome::AlreadyInProgress(id) => id,
        }
    }
}

/// Combined view of a source URL's progress.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TileStatusView {
    /// The status table has an entry (queued, running or finished this process).
    Active(JobStatus),
    /// Only the persisted index knows about it.
    Indexed(TileSetRecord),
    NotStarted { tile_id: TileId },
}

/// Owns the index, status table, pipeline and background runner.
pub struct TileService {
    pipeline: Arc<Pipeline>,
    runner: JobRunner,
}

impl TileService {
    /// Builds the production service: HTTP downloads and the GDAL toolchain.
    ///
    /// Must be called within a tokio runtime. Fails if the config is invalid or
    /// the persisted index is unreadable or corrupt.
    pub fn open(config: &Config, bridge: Arc<dyn DatasetStatusBridge>) -> Result<Self> {
        validate_config(config)?;
        let pipeline_config = PipelineConfig::from_config(config);
        let fetcher = HttpFetcher::new(
            pipeline_config.connect_timeout,
            pipeline_config.download_timeout,
        )
        .map_err(crate::pipeline::PipelineError::from)?;
        let toolchain = GdalToolchain::new(&pipeline_config);

        Self::with_components(
            pipeline_config,
            Arc::new(fetcher),
            Arc::new(toolchain),
            bridge,
        )
    }

    /// Builds a service around caller-supplied transport and toolchain.
    pub fn with_components(
        config: PipelineConfig,
        fetcher: Arc<dyn SourceFetcher>,
        toolchain: Arc<dyn RasterToolchain>,
        bridge: Arc<dyn DatasetStatusBridge>,
    ) -> Result<Self> {
        let index = Arc::new(TileIndex::load(&config.tiles_directory)?);
        let statuses = Arc::new(JobStatusTable::new());

        let pipeline = Arc::new(Pipeline::new(
            Arc::new(config),
            index,
            statuses,
            fetcher,
            toolchain,
            bridge,
        ));
        let runner = JobRunner::new(Arc::clone(&pipeline))?;

        info!(
            "Tile service ready ({} tile sets indexed)",
            pipeline.index().len()
        );

        Ok(Self { pipeline, runner })
    }

    /// Returns the existing tile set, or schedules a background run.
    ///
    /// Returns as soon as the job is queued; poll [`TileService::status`] or
    /// [`TileService::subscribe`] for progress.
    pub fn submit_or_run(&self, source_url: &str, metadata: Metadata) -> Result<SubmitOutcome> {
        if self.runner.is_shutdown() {
            return Err(crate::error::WorkerError::ShutDown.into());
        }

        match self.pipeline.admit(source_url, metadata) {
            Admission::Completed(record) => Ok(SubmitOutcome::Completed(record)),
            Admission::AlreadyInProgress(id) => Ok(SubmitOutcome::AlreadyInProgress(id)),
            Admission::Accepted(job) => {
                let id = job.tile_id.clone();
                if let Err(e) = self.runner.spawn(job) {
                    warn!("Could not start background run for {}: {}", id, e);
                    self.pipeline
                        .statuses()
                        .update_in_place(&id, StatusUpdate::failed(e.to_string()));
                    return Err(e.into());
                }
                Ok(SubmitOutcome::Queued(id))
            }
        }
    }

    /// Runs the pipeline inline and returns the finished tile set.
    ///
    /// Fails with the stage error if the run fails, or with
    /// [`TilesmithError::NotReady`] if another run for the same URL is
    /// already in progress.
    pub async fn run_blocking(&self, source_url: &str, metadata: Metadata) -> Result<TileSetRecord> {
        match self.pipeline.admit(source_url, metadata) {
            Admission::Completed(record) => Ok(record),
            Admission::AlreadyInProgress(tile_id) => Err(TilesmithError::NotReady { tile_id }),
            Admission::Accepted(job) => Ok(self.pipeline.execute(job).await?),
        }
    }

    pub fn status(&self, tile_id: &TileId) -> Option<JobStatus> {
        self.pipeline.statuses().get(tile_id)
    }

    /// Live status if this process has seen the URL, else the index record.
    pub fn status_for_url(&self, source_url: &str) -> TileStatusView {
        let tile_id = identifier_for(source_url);
        if let Some(status) = self.status(&tile_id) {
            return TileStatusView::Active(status);
        }
        match self.tile_info(source_url) {
            Some(record) => TileStatusView::Indexed(record),
            None => TileStatusView::NotStarted { tile_id },
        }
    }

    /// Every job status known to this process, most recent first.
    pub fn statuses(&self) -> Vec<JobStatus> {
        self.pipeline.statuses().snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobProgressEvent> {
        self.pipeline.statuses().subscribe()
    }

    pub fn tile_info(&self, source_url: &str) -> Option<TileSetRecord> {
        self.pipeline.index().get(&identifier_for(source_url))
    }

    /// Every persisted tile set, oldest first.
    pub fn tile_sets(&self) -> Vec<TileSetRecord> {
        self.pipeline.index().records()
    }

    pub fn is_completed(&self, source_url: &str) -> bool {
        self.pipeline
            .index()
            .contains_completed(&identifier_for(source_url))
    }

    /// `{base}/tiles/{id}/{z}/{x}/{y}.{ext}` for a completed URL.
    pub fn tile_url_template(&self, source_url: &str, base_url: &str) -> Result<String> {
        let tile_id = self.completed_id(source_url)?;
        Ok(urls::tile_url_template(
            base_url,
            &tile_id,
            &self.pipeline.config().tile_format,
        ))
    }

    pub fn thumbnail_url(&self, source_url: &str, base_url: &str) -> Result<String> {
        let tile_id = self.completed_id(source_url)?;
        Ok(urls::thumbnail_url(
            base_url,
            &tile_id,
            &self.pipeline.config().tile_format,
        ))
    }

    pub fn placeholder_url(&self, tile_id: &TileId, base_url: &str) -> String {
        urls::placeholder_url(base_url, tile_id)
    }

    /// Configured public base URL.
    pub fn base_url(&self) -> &str {
        &self.pipeline.config().base_url
    }

    fn completed_id(&self, source_url: &str) -> Result<TileId> {
        let tile_id = identifier_for(source_url);
        if self.pipeline.index().contains_completed(&tile_id) {
            Ok(tile_id)
        } else {
            Err(TilesmithError::NotReady { tile_id })
        }
    }

    /// Stops accepting background submissions.
    pub fn shutdown(&self) {
        self.runner.shutdown();
    }

    /// Awaits all background runs. Call after [`TileService::shutdown`].
    pub async fn wait(&self) {
        self.runner.wait().await;
    }

    pub fn in_flight(&self) -> usize {
        self.runner.in_flight()
    }
}
