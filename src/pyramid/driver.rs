//! Pyramid driver.
//!
//! [`PyramidConverter::convert`] walks the conversion state machine:
//!
//! ```text
//! Probing → WritingMetadata → ┌ per series ─────────────────────────────┐ → Done
//!                             │  switch pool to series (barrier)        │
//!                             │  ┌ per resolution ───────────────────┐  │
//!                             │  │ Creating → Scheduling → Draining  │  │
//!                             │  └───────────────────────────────────┘  │
//!                             └─────────────────────────────────────────┘
//!                  any error ─────────────────────────────────────────────► Failed
//! ```
//!
//! Level `r + 1` is never enumerated before every task of level `r` has
//! returned, because its tiles are built from level `r`'s chunks.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, error, info};

use crate::config::default_worker_count;
use crate::error::{ConfigError, ConvertError, StoreError};
use crate::io::{ChunkStore, Compression};
use crate::slide::{run_blocking, ImageReader, ImageSource, ReaderPool};
use crate::tile::{BoxFilter, Downsampler, LevelContext, TileWriter};

use super::axes::AxisOrder;
use super::levels::{
    dataset_path, validate_path_format, LevelGeometry, SeriesInfo, DEFAULT_PATH_FORMAT,
    LAYOUT_ATTRIBUTE, LAYOUT_VERSION, MIN_SIZE,
};
use super::scheduler::{BoundedScheduler, LevelJoin};

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 1024;

// =============================================================================
// Options / Summary
// =============================================================================

/// Options for one conversion.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Number of levels per series; derived from the image size when `None`
    pub resolutions: Option<u32>,

    pub tile_width: u32,
    pub tile_height: u32,

    /// Tile workers, and reader handles in the pool
    pub worker_count: usize,

    /// Extent threshold used to derive the resolution count
    pub min_size: u32,

    /// Dataset path format with `{series}` and `{resolution}` placeholders
    pub path_format: String,

    /// Overrides the axis order declared by the source
    pub axis_order: Option<AxisOrder>,

    pub compression: Compression,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            resolutions: None,
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            worker_count: default_worker_count(),
            min_size: MIN_SIZE,
            path_format: DEFAULT_PATH_FORMAT.to_string(),
            axis_order: None,
            compression: Compression::gzip(None),
        }
    }
}

impl ConvertOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_format(&self.path_format)?;
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(ConfigError::InvalidOption(
                "tile width and height must be greater than 0".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::InvalidOption(
                "worker count must be greater than 0".to_string(),
            ));
        }
        if self.resolutions == Some(0) {
            return Err(ConfigError::InvalidOption(
                "resolution count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// What a successful conversion produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Decoder that recognised the input
    pub format: String,

    /// Number of levels written, per series
    pub resolutions: Vec<u32>,

    pub tiles_written: u64,
}

impl ConversionSummary {
    pub fn series_count(&self) -> usize {
        self.resolutions.len()
    }
}

// =============================================================================
// Driver State
// =============================================================================

/// Stage of a running conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Probing,
    WritingMetadata,
    Creating { series: usize, resolution: u32 },
    Scheduling { series: usize, resolution: u32 },
    Draining { series: usize, resolution: u32 },
    Done,
    Failed,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Probing => write!(f, "probing input"),
            DriverState::WritingMetadata => write!(f, "writing metadata"),
            DriverState::Creating { series, resolution } => {
                write!(f, "creating series {} resolution {}", series, resolution)
            }
            DriverState::Scheduling { series, resolution } => {
                write!(f, "scheduling series {} resolution {}", series, resolution)
            }
            DriverState::Draining { series, resolution } => {
                write!(f, "draining series {} resolution {}", series, resolution)
            }
            DriverState::Done => write!(f, "done"),
            DriverState::Failed => write!(f, "failed"),
        }
    }
}

fn enter(state: &mut DriverState, next: DriverState) {
    debug!("Conversion state: {} -> {}", state, next);
    *state = next;
}

// =============================================================================
// Pyramid Converter
// =============================================================================

/// Converts one input into a pyramid.
pub struct PyramidConverter<S, C: ?Sized> {
    source: S,
    store: Arc<C>,
    options: ConvertOptions,
    downsampler: Arc<dyn Downsampler>,
}

impl<S, C> PyramidConverter<S, C>
where
    S: ImageSource,
    C: ChunkStore + ?Sized + 'static,
{
    pub fn new(source: S, store: Arc<C>, options: ConvertOptions) -> Self {
        Self {
            source,
            store,
            options,
            downsampler: Arc::new(BoxFilter),
        }
    }

    /// Replace the default 2x2 box filter.
    pub fn with_downsampler(mut self, downsampler: Arc<dyn Downsampler>) -> Self {
        self.downsampler = downsampler;
        self
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Convert `input`, writing `METADATA.<ext>` under `output` and every
    /// dataset through the chunk store.
    ///
    /// On failure every tile already scheduled is allowed to finish and the
    /// reader pool is closed before the first error is returned.
    pub async fn convert(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<ConversionSummary, ConvertError> {
        self.options.validate()?;
        let start = Instant::now();
        let mut state = DriverState::Probing;

        info!(
            "Converting {} with {} workers",
            input.display(),
            self.options.worker_count
        );
        let opened = run_blocking(|| {
            ReaderPool::open(&self.source, input, self.options.worker_count)
        });
        let pool = match opened {
            Ok(pool) => {
                debug!("Reader pool holds {} handles", pool.size());
                Arc::new(pool)
            }
            Err(e) => {
                error!("Conversion failed while {}: {}", state, e);
                return Err(e.into());
            }
        };

        let scheduler = BoundedScheduler::new(self.options.worker_count);
        let result = self.run(&pool, &scheduler, output, &mut state).await;

        scheduler.shutdown().await;
        pool.close().await;

        match result {
            Ok(summary) => {
                enter(&mut state, DriverState::Done);
                info!(
                    "Converted {} series ({} tiles) in {:?}",
                    summary.series_count(),
                    summary.tiles_written,
                    start.elapsed()
                );
                Ok(summary)
            }
            Err(e) => {
                error!("Conversion failed while {}: {}", state, e);
                enter(&mut state, DriverState::Failed);
                Err(e)
            }
        }
    }

    async fn run<R>(
        &self,
        pool: &Arc<ReaderPool<R>>,
        scheduler: &BoundedScheduler,
        output: &Path,
        state: &mut DriverState,
    ) -> Result<ConversionSummary, ConvertError>
    where
        R: ImageReader + 'static,
    {
        let (format, series_count, metadata) = {
            let reader = pool.acquire().await?;
            (
                reader.format_name().to_string(),
                reader.series_count(),
                reader.metadata_document()?,
            )
        };
        info!("Using {} reader, {} series", format, series_count);

        enter(state, DriverState::WritingMetadata);
        tokio::fs::create_dir_all(output)
            .await
            .map_err(|e| StoreError::io(output, e))?;
        let metadata_file = output.join(format!("METADATA.{}", metadata.extension));
        tokio::fs::write(&metadata_file, metadata.contents.as_bytes())
            .await
            .map_err(|e| StoreError::io(&metadata_file, e))?;
        self.store
            .set_root_attribute(LAYOUT_ATTRIBUTE, json!(LAYOUT_VERSION))
            .await?;

        let writer = TileWriter::new(
            Arc::clone(pool),
            Arc::clone(&self.store),
            Arc::clone(&self.downsampler),
        );

        let mut summary = ConversionSummary {
            format,
            resolutions: Vec::with_capacity(series_count),
            tiles_written: 0,
        };
        for series in 0..series_count {
            pool.switch_series(series).await?;
            let info = {
                let reader = pool.acquire().await?;
                Arc::new(SeriesInfo::from_reader(
                    &*reader,
                    self.options.axis_order.as_ref(),
                )?)
            };

            let resolutions = self
                .options
                .resolutions
                .unwrap_or_else(|| info.resolution_count(self.options.min_size));
            // Geometry of every level is checked before anything is written
            let levels = (0..resolutions)
                .map(|r| info.level(r, self.options.tile_width, self.options.tile_height))
                .collect::<Result<Vec<_>, _>>()?;

            info!(
                "Series {}: {}x{} ({} planes, {}, order {}), {} resolutions",
                series,
                info.size_x,
                info.size_y,
                info.image_count(),
                info.pixel_type,
                info.axes,
                resolutions
            );

            for level in levels {
                summary.tiles_written += self
                    .write_level(&info, level, &writer, scheduler, state)
                    .await?;
            }
            summary.resolutions.push(resolutions);
        }
        Ok(summary)
    }

    /// Create one dataset, schedule all its tiles and wait for them.
    async fn write_level<R>(
        &self,
        info: &Arc<SeriesInfo>,
        level: LevelGeometry,
        writer: &TileWriter<R, C>,
        scheduler: &BoundedScheduler,
        state: &mut DriverState,
    ) -> Result<u64, ConvertError>
    where
        R: ImageReader + 'static,
    {
        let (series, resolution) = (level.series, level.resolution);

        enter(state, DriverState::Creating { series, resolution });
        let path = dataset_path(&self.options.path_format, series, resolution);
        let attributes = info.dataset_attributes(&level, self.options.compression)?;
        self.store.create_dataset(&path, attributes).await?;

        let prior_path = resolution
            .checked_sub(1)
            .map(|prior| dataset_path(&self.options.path_format, series, prior));
        let ctx = Arc::new(LevelContext::new(
            Arc::clone(info),
            level,
            path.clone(),
            prior_path,
        ));

        enter(state, DriverState::Scheduling { series, resolution });
        info!(
            "Writing {} ({}x{}, {} tiles)",
            path,
            level.width,
            level.height,
            level.tile_count()
        );
        let level_start = Instant::now();
        let mut join = LevelJoin::new();
        for task in level.tasks() {
            if scheduler.has_failed() {
                debug!("Stopping enumeration of {} after a tile failure", path);
                break;
            }
            let writer = writer.clone();
            let ctx = Arc::clone(&ctx);
            let token = scheduler
                .submit(async move { writer.write(&ctx, task).await })
                .await?;
            join.push(token);
        }

        enter(state, DriverState::Draining { series, resolution });
        join.wait().await?;

        info!(
            "Finished {} ({} tiles) in {:?}",
            path,
            ctx.completed(),
            level_start.elapsed()
        );
        Ok(ctx.completed())
    }
}
