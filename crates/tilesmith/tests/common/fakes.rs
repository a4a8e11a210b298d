//! In-process stand-ins for the network and the GDAL toolchain.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use tilesmith::bridge::{DatasetOutcome, DatasetStatusBridge, TileDescriptor};
use tilesmith::pipeline::{ByteProgress, RasterToolchain, SourceFetcher};
use tilesmith::{FetchError, ToolError};

pub const FAKE_IMAGE: &[u8] = b"\x89PNG fake raster payload";

/// Fetcher that writes a fixed payload. URLs containing `missing` get a 404.
pub struct FakeFetcher {
    pub calls: AtomicUsize,
    gate: Option<Semaphore>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Every fetch blocks until [`FakeFetcher::release`] is called.
    pub fn gated() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Some(Semaphore::new(0)),
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: ByteProgress<'_>,
    ) -> Result<u64, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }

        if url.contains("missing") {
            return Err(FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            });
        }

        tokio::fs::write(dest, FAKE_IMAGE)
            .await
            .map_err(|source| FetchError::Write {
                path: dest.to_path_buf(),
                source,
            })?;
        let len = FAKE_IMAGE.len() as u64;
        progress(len / 2, Some(len));
        progress(len, Some(len));
        Ok(len)
    }
}

/// Toolchain that fabricates outputs instead of running GDAL.
pub struct FakeToolchain {
    pub width: u32,
    pub height: u32,
    pub georeference_calls: AtomicUsize,
    pub dimension_calls: AtomicUsize,
    pub tiling_calls: AtomicUsize,
    /// Tiler exits successfully without writing anything.
    pub empty_output: AtomicBool,
    pub fail_georeference: AtomicBool,
    /// Tiler panics after creating its first zoom directory.
    pub panic_on_tiling: AtomicBool,
    /// Pause after each tile the tiler writes.
    tile_delay: Option<Duration>,
}

impl FakeToolchain {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            georeference_calls: AtomicUsize::new(0),
            dimension_calls: AtomicUsize::new(0),
            tiling_calls: AtomicUsize::new(0),
            empty_output: AtomicBool::new(false),
            fail_georeference: AtomicBool::new(false),
            panic_on_tiling: AtomicBool::new(false),
            tile_delay: None,
        }
    }

    /// A tiler that takes `delay` per tile, so progress polling observes it.
    pub fn slow(width: u32, height: u32, delay: Duration) -> Self {
        Self {
            tile_delay: Some(delay),
            ..Self::new(width, height)
        }
    }

    pub fn georeference_calls(&self) -> usize {
        self.georeference_calls.load(Ordering::SeqCst)
    }

    pub fn dimension_calls(&self) -> usize {
        self.dimension_calls.load(Ordering::SeqCst)
    }

    pub fn tiling_calls(&self) -> usize {
        self.tiling_calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeToolchain {
    fn default() -> Self {
        Self::new(512, 256)
    }
}

#[async_trait]
impl RasterToolchain for FakeToolchain {
    async fn georeference(&self, source: &Path, dest: &Path) -> Result<(), ToolError> {
        self.georeference_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_georeference.load(Ordering::SeqCst) {
            return Err(ToolError::Failed {
                tool: "gdal_translate".to_string(),
                code: 1,
                diagnostics: "ERROR 4: not recognized as a supported file format".to_string(),
            });
        }

        tokio::fs::copy(source, dest)
            .await
            .map_err(|source| ToolError::Spawn {
                tool: "gdal_translate".to_string(),
                source,
            })?;
        Ok(())
    }

    async fn dimensions(&self, _raster: &Path) -> Result<(u32, u32), ToolError> {
        self.dimension_calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.width, self.height))
    }

    async fn generate_tiles(
        &self,
        _raster: &Path,
        out_dir: &Path,
        max_zoom: u8,
    ) -> Result<(), ToolError> {
        self.tiling_calls.fetch_add(1, Ordering::SeqCst);

        if self.empty_output.load(Ordering::SeqCst) {
            return Ok(());
        }

        if self.panic_on_tiling.load(Ordering::SeqCst) {
            std::fs::create_dir_all(out_dir.join("0")).expect("create zoom dir");
            panic!("tiler crashed");
        }

        for z in 0..=u32::from(max_zoom) {
            let side = 1u32 << z;
            for x in 0..side {
                let column = out_dir.join(z.to_string()).join(x.to_string());
                std::fs::create_dir_all(&column).expect("create tile column");
                for y in 0..side {
                    std::fs::write(column.join(format!("{}.png", y)), b"tile")
                        .expect("write tile");
                    if let Some(delay) = self.tile_delay {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Bridge that records every notification.
#[derive(Default)]
pub struct RecordingBridge {
    pub calls: Mutex<Vec<(String, DatasetOutcome, Option<TileDescriptor>)>>,
}

impl RecordingBridge {
    pub fn calls(&self) -> Vec<(String, DatasetOutcome, Option<TileDescriptor>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatasetStatusBridge for RecordingBridge {
    async fn on_job_terminal(
        &self,
        dataset_id: &str,
        outcome: DatasetOutcome,
        tiles: Option<&TileDescriptor>,
    ) {
        self.calls
            .lock()
            .unwrap()
            .push((dataset_id.to_string(), outcome, tiles.cloned()));
    }
}
