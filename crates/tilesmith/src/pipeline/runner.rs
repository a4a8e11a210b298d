use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::bridge::{DatasetOutcome, DatasetStatusBridge, TileDescriptor};
use crate::identity::TileId;
use crate::index::{Metadata, TileIndex, TileSetRecord};
use crate::sanitize;
use crate::status::{JobStatusTable, Stage, StatusUpdate};
use crate::zoom;

use super::config::PipelineConfig;
use super::context::{Artifacts, PipelineContext, TileJob};
use super::error::PipelineError;
use super::fetch::SourceFetcher;
use super::progress::{ProgressEvent, ProgressReporter, StatusProgress};
use super::toolchain::RasterToolchain;

const DOWNLOAD_BAND: (u8, u8) = (0, 20);
const GEOREFERENCE_BAND: (u8, u8) = (20, 40);
const TILING_BAND: (u8, u8) = (40, 95);
const FINALIZE_START: u8 = 95;

/// Result of asking the pipeline to take on a source URL.
#[derive(Debug)]
pub enum Admission {
    /// A completed tile set already exists; nothing to run.
    Completed(TileSetRecord),
    /// A run for this identifier is queued or processing.
    AlreadyInProgress(TileId),
    /// Status seeded to queued; the caller must now execute the job.
    Accepted(TileJob),
}

/// Four-stage resumable orchestrator: download, georeference, tile, finalize.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    index: Arc<TileIndex>,
    statuses: Arc<JobStatusTable>,
    fetcher: Arc<dyn SourceFetcher>,
    toolchain: Arc<dyn RasterToolchain>,
    bridge: Arc<dyn DatasetStatusBridge>,
}

impl Pipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        index: Arc<TileIndex>,
        statuses: Arc<JobStatusTable>,
        fetcher: Arc<dyn SourceFetcher>,
        toolchain: Arc<dyn RasterToolchain>,
        bridge: Arc<dyn DatasetStatusBridge>,
    ) -> Self {
        Self {
            config,
            index,
            statuses,
            fetcher,
            toolchain,
            bridge,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<TileIndex> {
        &self.index
    }

    pub fn statuses(&self) -> &Arc<JobStatusTable> {
        &self.statuses
    }

    /// Runs the pre-flight checks and, when a run is needed, seeds its
    /// status as queued.
    pub fn admit(&self, source_url: &str, metadata: Metadata) -> Admission {
        let job = TileJob::new(source_url, metadata);

        if self.index.contains_completed(&job.tile_id) {
            if let Some(record) = self.index.get(&job.tile_id) {
                debug!("Tile set {} already completed, skipping run", job.tile_id);
                return Admission::Completed(record);
            }
        }

        match self.statuses.try_claim(&job.tile_id, &job.source_url) {
            Ok(_) => Admission::Accepted(job),
            Err(existing) => {
                info!(
                    "Tile set {} is already {} ({}%), not starting another run",
                    job.tile_id, existing.status, existing.percentage
                );
                Admission::AlreadyInProgress(job.tile_id)
            }
        }
    }

    /// Runs an admitted job, reporting progress into the status table.
    pub async fn execute(&self, job: TileJob) -> Result<TileSetRecord, PipelineError> {
        let progress = StatusProgress::new(job.tile_id.clone(), Arc::clone(&self.statuses));
        self.execute_with(job, &progress).await
    }

    /// Runs an admitted job with a caller-supplied progress reporter.
    ///
    /// Failures are reported to `progress` and to the dataset bridge before
    /// being returned.
    pub async fn execute_with(
        &self,
        job: TileJob,
        progress: &dyn ProgressReporter,
    ) -> Result<TileSetRecord, PipelineError> {
        let span = info_span!("pipeline",
            tile_id = %job.tile_id,
            run_id = %job.run_id,
            source = %sanitize::redact_url(&job.source_url),
        );

        async move {
            let mut ctx = PipelineContext::new(job, &self.config);
            match self.run_stages(&mut ctx, progress).await {
                Ok(record) => {
                    progress.report(ProgressEvent::Completed {
                        message: format!(
                            "Tiles ready (zoom {}-{})",
                            record.min_zoom, record.max_zoom
                        ),
                    });
                    if !ctx.skipped.is_empty() {
                        info!("Resumed from checkpoints: {}", ctx.skipped.join(", "));
                    }
                    info!("Tile set {} completed", record.tile_id);
                    self.notify(&ctx.job, DatasetOutcome::Ready, Some(&record))
                        .await;
                    Ok(record)
                }
                Err(e) => {
                    warn!("Run failed during {}: {}", ctx.stage, e);
                    remove_staging(&ctx.artifacts).await;
                    progress.report(ProgressEvent::Failed {
                        error: e.to_string(),
                    });
                    self.notify(&ctx.job, DatasetOutcome::Failed, None).await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Fails a job whose run ended without returning, e.g. by panicking.
    ///
    /// Cleans up staging artifacts, marks the status failed and tells the
    /// dataset bridge, as a returned error would.
    pub async fn abandon(&self, job: &TileJob, reason: &str) {
        warn!("Abandoning run for {}: {}", job.tile_id, reason);
        remove_staging(&Artifacts::for_job(job, &self.config)).await;
        self.statuses
            .update_in_place(&job.tile_id, StatusUpdate::failed(reason));
        self.notify(job, DatasetOutcome::Failed, None).await;
    }

    async fn run_stages(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<TileSetRecord, PipelineError> {
        self.ensure_directories().await?;

        self.step_download(ctx, progress)
            .instrument(info_span!("download"))
            .await?;

        self.step_georeference(ctx, progress)
            .instrument(info_span!("georeference"))
            .await?;

        self.step_generate_tiles(ctx, progress)
            .instrument(info_span!("generate_tiles"))
            .await?;

        self.step_finalize(ctx, progress)
            .instrument(info_span!("finalize"))
            .await
    }

    async fn ensure_directories(&self) -> Result<(), PipelineError> {
        for dir in [
            &self.config.downloads_directory,
            &self.config.tiles_directory,
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::filesystem(dir, e))?;
        }
        Ok(())
    }

    async fn step_download(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let (start, end) = DOWNLOAD_BAND;
        ctx.stage = Stage::Downloading;
        progress.report(ProgressEvent::Stage {
            stage: Stage::Downloading,
            percentage: start,
            message: "Downloading source image".to_string(),
        });

        let raw = ctx.artifacts.raw.clone();
        if is_file(&raw).await {
            info!("Found {}, skipping download", sanitize::redact_path(&raw));
            ctx.skipped.push("download");
            progress.report(ProgressEvent::Percentage(end));
            return Ok(());
        }

        let staging = ctx.artifacts.raw_staging.clone();
        remove_path(&staging).await;

        let last_reported = AtomicU8::new(start);
        let on_bytes = |received: u64, total: Option<u64>| {
            let Some(total) = total else { return };
            let percentage = band_percentage(DOWNLOAD_BAND, received, total);
            if last_reported.fetch_max(percentage, Ordering::Relaxed) < percentage {
                progress.report(ProgressEvent::Percentage(percentage));
            }
        };

        let bytes = self
            .fetcher
            .fetch(&ctx.job.source_url, &staging, &on_bytes)
            .await?;
        promote(&staging, &raw).await?;

        info!(bytes, "Downloaded source to {}", sanitize::redact_path(&raw));
        progress.report(ProgressEvent::Percentage(end));
        Ok(())
    }

    async fn step_georeference(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let (start, end) = GEOREFERENCE_BAND;
        ctx.stage = Stage::Georeferencing;
        progress.report(ProgressEvent::Stage {
            stage: Stage::Georeferencing,
            percentage: start,
            message: "Georeferencing image".to_string(),
        });

        let georef = ctx.artifacts.georef.clone();
        if is_file(&georef).await {
            info!("Found {}, skipping georeference", sanitize::redact_path(&georef));
            ctx.skipped.push("georeference");
            progress.report(ProgressEvent::Percentage(end));
            return Ok(());
        }

        let staging = ctx.artifacts.georef_staging.clone();
        remove_path(&staging).await;

        self.toolchain
            .georeference(&ctx.artifacts.raw, &staging)
            .await
            .map_err(PipelineError::Georeference)?;
        promote(&staging, &georef).await?;

        progress.report(ProgressEvent::Percentage(end));
        Ok(())
    }

    async fn step_generate_tiles(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let (start, end) = TILING_BAND;
        ctx.stage = Stage::GeneratingTiles;
        progress.report(ProgressEvent::Stage {
            stage: Stage::GeneratingTiles,
            percentage: start,
            message: "Generating tiles".to_string(),
        });

        let tiles = ctx.artifacts.tiles.clone();
        if zoom_range(&tiles).await?.is_some() {
            info!("Tile directory already populated, skipping tile generation");
            ctx.skipped.push("generate_tiles");
            progress.report(ProgressEvent::Percentage(end));
            return Ok(());
        }
        // A tile directory without zoom levels is not a checkpoint.
        remove_path(&tiles).await;

        let georef = ctx.artifacts.georef.clone();
        let (width, height) = self
            .toolchain
            .dimensions(&georef)
            .await
            .map_err(PipelineError::DimensionProbe)?;
        let max_zoom = zoom::compute_max_zoom(
            width,
            height,
            self.config.tile_size,
            self.config.max_zoom_cap,
        );
        ctx.target_max_zoom = Some(max_zoom);
        info!(width, height, max_zoom, "Generating zoom levels 0-{}", max_zoom);

        let staging = ctx.artifacts.tiles_staging.clone();
        remove_path(&staging).await;
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| PipelineError::filesystem(&staging, e))?;

        self.run_tiler_with_polling(&georef, &staging, max_zoom, progress)
            .await
            .map_err(PipelineError::TileGeneration)?;

        // An empty result stays in staging and fails finalize.
        if zoom_range(&staging).await?.is_some() {
            promote(&staging, &tiles).await?;
        } else {
            warn!("Tiler exited successfully but produced no zoom levels");
        }

        progress.report(ProgressEvent::Percentage(end));
        Ok(())
    }

    /// Runs the tiler while estimating progress from the files it has written.
    async fn run_tiler_with_polling(
        &self,
        georef: &Path,
        staging: &Path,
        max_zoom: u8,
        progress: &dyn ProgressReporter,
    ) -> Result<(), crate::error::ToolError> {
        let expected = zoom::expected_tile_count(max_zoom);
        let mut tiler = self.toolchain.generate_tiles(georef, staging, max_zoom);

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut tiler => return result,
                _ = ticker.tick() => {
                    let produced = count_tiles(staging, &self.config.tile_format).await;
                    let percentage = tiling_percentage(produced, expected);
                    debug!(produced, expected, percentage, "Tiling progress");
                    progress.report(ProgressEvent::Percentage(percentage));
                }
            }
        }
    }

    async fn step_finalize(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<TileSetRecord, PipelineError> {
        ctx.stage = Stage::Finalizing;
        progress.report(ProgressEvent::Stage {
            stage: Stage::Finalizing,
            percentage: FINALIZE_START,
            message: "Finalizing tile set".to_string(),
        });

        let tiles = &ctx.artifacts.tiles;
        let (min_zoom, max_zoom) = zoom_range(tiles)
            .await?
            .ok_or_else(|| PipelineError::EmptyOutput {
                path: tiles.clone(),
            })?;
        ctx.zoom_range = Some((min_zoom, max_zoom));

        if let Some(target) = ctx.target_max_zoom {
            if max_zoom != target {
                debug!("Tiler produced zoom {}-{}, target was 0-{}", min_zoom, max_zoom, target);
            }
        }

        let record = TileSetRecord::completed(
            ctx.job.tile_id.clone(),
            &ctx.job.source_url,
            ctx.job.tile_id.to_string(),
            min_zoom,
            max_zoom,
            ctx.job.metadata.clone(),
        );
        let index = Arc::clone(&self.index);
        let stored = record.clone();
        tokio::task::spawn_blocking(move || index.put(stored)).await??;

        Ok(record)
    }

    async fn notify(&self, job: &TileJob, outcome: DatasetOutcome, record: Option<&TileSetRecord>) {
        let Some(dataset_id) = job.dataset_id() else {
            return;
        };

        let descriptor = record.map(|r| {
            TileDescriptor::from_record(r, &self.config.base_url, &self.config.tile_format)
        });
        debug!("Notifying dataset {} of {:?}", dataset_id, outcome);
        self.bridge
            .on_job_terminal(dataset_id, outcome, descriptor.as_ref())
            .await;
    }
}

/// Maps `done/total` onto a progress band, never reaching the band's end.
fn band_percentage((start, end): (u8, u8), done: u64, total: u64) -> u8 {
    if total == 0 {
        return start;
    }
    let width = u64::from(end - start);
    let scaled = (width * done.min(total)) / total;
    (u64::from(start) + scaled).min(u64::from(end) - 1) as u8
}

/// Stage 3 estimate; stays below 95 until the tiler exits.
fn tiling_percentage(produced: u64, expected: u64) -> u8 {
    band_percentage(TILING_BAND, produced, expected)
}

async fn count_tiles(dir: &Path, extension: &str) -> u64 {
    let dir = dir.to_path_buf();
    let extension = extension.to_string();
    tokio::task::spawn_blocking(move || zoom::count_tiles(&dir, &extension))
        .await
        .unwrap_or(0)
}

async fn zoom_range(dir: &Path) -> Result<Option<(u8, u8)>, PipelineError> {
    let dir = dir.to_path_buf();
    Ok(tokio::task::spawn_blocking(move || zoom::discover_zoom_range(&dir)).await?)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Moves a finished staging artifact to its checkpoint name.
async fn promote(staging: &Path, checkpoint: &Path) -> Result<(), PipelineError> {
    tokio::fs::rename(staging, checkpoint)
        .await
        .map_err(|e| PipelineError::filesystem(checkpoint, e))
}

/// Best-effort removal of a file or directory.
async fn remove_path(path: &Path) {
    let Ok(meta) = tokio::fs::symlink_metadata(path).await else {
        return;
    };
    let result = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    if let Err(e) = result {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

async fn remove_staging(artifacts: &Artifacts) {
    for path in artifacts.staging_paths() {
        remove_path(path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_percentage() {
        assert_eq!(band_percentage(DOWNLOAD_BAND, 0, 100), 0);
        assert_eq!(band_percentage(DOWNLOAD_BAND, 50, 100), 10);
        assert_eq!(band_percentage(DOWNLOAD_BAND, 100, 100), 19);
        assert_eq!(band_percentage(DOWNLOAD_BAND, 500, 100), 19);
        assert_eq!(band_percentage(DOWNLOAD_BAND, 10, 0), 0);
    }

    #[test]
    fn test_tiling_percentage_stays_below_finalize() {
        assert_eq!(tiling_percentage(0, 21), 40);
        assert_eq!(tiling_percentage(21, 21), 94);
        assert_eq!(tiling_percentage(10_000, 21), 94);
        assert!(tiling_percentage(10, 21) > 40);
    }
}
