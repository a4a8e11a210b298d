//! Stages 2 and 3: the external GDAL toolchain.

use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::schema::{tile_driver, ToolsConfig};
use crate::error::ToolError;

use super::config::PipelineConfig;

static RE_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Size is (\d+),\s*(\d+)").unwrap());

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_DIAGNOSTIC_CHARS: usize = 4000;

/// Operations the pipeline needs from an imaging toolchain.
#[async_trait]
pub trait RasterToolchain: Send + Sync {
    /// Writes a copy of `source` to `dest` stamped with a world-spanning
    /// geographic extent.
    async fn georeference(&self, source: &Path, dest: &Path) -> Result<(), ToolError>;

    /// Pixel width and height of a raster.
    async fn dimensions(&self, raster: &Path) -> Result<(u32, u32), ToolError>;

    /// Renders an XYZ tile tree for zoom levels `0..=max_zoom` into `out_dir`.
    async fn generate_tiles(
        &self,
        raster: &Path,
        out_dir: &Path,
        max_zoom: u8,
    ) -> Result<(), ToolError>;
}

/// [`RasterToolchain`] backed by the GDAL command line utilities.
pub struct GdalToolchain {
    tools: ToolsConfig,
    tile_format: String,
    processes: usize,
    georeference_timeout: Duration,
    probe_timeout: Duration,
    tiling_timeout: Duration,
    translate: OnceCell<String>,
    info: OnceCell<String>,
    tiler: OnceCell<String>,
}

impl GdalToolchain {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            tools: config.tools.clone(),
            tile_format: config.tile_format.clone(),
            processes: config.processes,
            georeference_timeout: config.georeference_timeout,
            probe_timeout: config.probe_timeout,
            tiling_timeout: config.tiling_timeout,
            translate: OnceCell::new(),
            info: OnceCell::new(),
            tiler: OnceCell::new(),
        }
    }

    async fn translate(&self) -> Result<&str, ToolError> {
        self.translate
            .get_or_try_init(|| discover("gdal_translate", &self.tools.translate))
            .await
            .map(String::as_str)
    }

    async fn info(&self) -> Result<&str, ToolError> {
        self.info
            .get_or_try_init(|| discover("gdalinfo", &self.tools.info))
            .await
            .map(String::as_str)
    }

    async fn tiler(&self) -> Result<&str, ToolError> {
        self.tiler
            .get_or_try_init(|| discover("gdal2tiles", &self.tools.tiler))
            .await
            .map(String::as_str)
    }
}

#[async_trait]
impl RasterToolchain for GdalToolchain {
    async fn georeference(&self, source: &Path, dest: &Path) -> Result<(), ToolError> {
        let program = self.translate().await?;
        let args = georeference_args(source, dest);
        run_tool("gdal_translate", program, &args, self.georeference_timeout).await?;
        Ok(())
    }

    async fn dimensions(&self, raster: &Path) -> Result<(u32, u32), ToolError> {
        let program = self.info().await?;
        let args = vec![raster.to_string_lossy().to_string()];
        let output = run_tool("gdalinfo", program, &args, self.probe_timeout).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_dimensions(&stdout).ok_or_else(|| ToolError::UnparseableOutput {
            tool: "gdalinfo".to_string(),
            output: truncate_tail(stdout.trim()),
        })
    }

    async fn generate_tiles(
        &self,
        raster: &Path,
        out_dir: &Path,
        max_zoom: u8,
    ) -> Result<(), ToolError> {
        let driver =
            tile_driver(&self.tile_format).ok_or_else(|| ToolError::UnsupportedFormat {
                tool: "gdal2tiles".to_string(),
                format: self.tile_format.clone(),
            })?;
        let program = self.tiler().await?;
        let args = tiling_args(raster, out_dir, max_zoom, self.processes, driver);
        run_tool("gdal2tiles", program, &args, self.tiling_timeout).await?;
        Ok(())
    }
}

fn georeference_args(source: &Path, dest: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-of", "GTiff", "-a_srs", "EPSG:4326", "-a_ullr", "-180", "90", "180", "-90",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(source.to_string_lossy().to_string());
    args.push(dest.to_string_lossy().to_string());
    args
}

fn tiling_args(
    raster: &Path,
    out_dir: &Path,
    max_zoom: u8,
    processes: usize,
    driver: &str,
) -> Vec<String> {
    let mut args = vec!["--xyz".to_string(), "--profile=mercator".to_string()];
    // PNG is the tiler's default; older releases lack --tiledriver.
    if driver != "PNG" {
        args.push(format!("--tiledriver={}", driver));
    }
    args.extend([
        format!("--zoom=0-{}", max_zoom),
        format!("--processes={}", processes.max(1)),
        "--webviewer=none".to_string(),
        raster.to_string_lossy().to_string(),
        out_dir.to_string_lossy().to_string(),
    ]);
    args
}

/// Extracts `(width, height)` from `gdalinfo` output.
pub fn parse_dimensions(output: &str) -> Option<(u32, u32)> {
    let caps = RE_SIZE.captures(output)?;
    let width = caps.get(1)?.as_str().parse().ok()?;
    let height = caps.get(2)?.as_str().parse().ok()?;
    Some((width, height))
}

/// Returns the first candidate that answers `--version` successfully.
async fn discover(tool: &str, candidates: &[String]) -> Result<String, ToolError> {
    for candidate in candidates {
        let probe = Command::new(candidate)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(status)) if status.success() => {
                info!("Using {} for {}", candidate, tool);
                return Ok(candidate.clone());
            }
            Ok(Ok(status)) => debug!("{} --version exited with {}", candidate, status),
            Ok(Err(e)) => debug!("{} is not runnable: {}", candidate, e),
            Err(_) => debug!("{} --version timed out", candidate),
        }
    }

    Err(ToolError::NotInstalled {
        tool: tool.to_string(),
        tried: candidates.join(", "),
    })
}

/// Runs `program` to completion, killing it if `timeout` elapses.
async fn run_tool(
    tool: &str,
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<Output, ToolError> {
    debug!("Running {} {}", program, args.join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            tool: tool.to_string(),
            source,
        })?;

    // Dropping the future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ToolError::Spawn {
            tool: tool.to_string(),
            source,
        })?,
        Err(_) => {
            return Err(ToolError::Timeout {
                tool: tool.to_string(),
                seconds: timeout.as_secs(),
            })
        }
    };

    if !output.status.success() {
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            code: output.status.code().unwrap_or(-1),
            diagnostics: diagnostics(&output),
        });
    }

    Ok(output)
}

/// Stderr, or stdout when stderr is empty, keeping only the tail.
fn diagnostics(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout)
    } else {
        stderr
    };
    let text = text.trim();
    if text.is_empty() {
        "no diagnostic output".to_string()
    } else {
        truncate_tail(text)
    }
}

fn truncate_tail(text: &str) -> String {
    let count = text.chars().count();
    if count <= MAX_DIAGNOSTIC_CHARS {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - MAX_DIAGNOSTIC_CHARS).collect();
    format!("...{}", tail)
}
