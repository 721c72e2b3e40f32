//! Per-task tile production.
//!
//! [`TileWriter::write`] is the body of every scheduled tile task: produce
//! the tile's samples (decode at resolution 0, reassemble above), then write
//! exactly one chunk.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, error, info};

use crate::error::{ConvertError, SourceError};
use crate::io::ChunkStore;
use crate::pyramid::{LevelGeometry, SeriesInfo};
use crate::slide::{run_blocking, ImageReader, ReaderPool};

use super::downsample::Downsampler;
use super::reassemble::reassemble;
use super::task::TileTask;

/// Number of progress lines logged per level.
const PROGRESS_STEPS: u64 = 10;

// =============================================================================
// Level Context
// =============================================================================

/// Immutable state shared by every task of one level.
#[derive(Debug)]
pub struct LevelContext {
    pub series: Arc<SeriesInfo>,
    pub level: LevelGeometry,

    /// Dataset being written
    pub path: String,

    /// Dataset of the previous level, `None` at resolution 0
    pub prior_path: Option<String>,

    completed: AtomicU64,
    total: u64,
}

impl LevelContext {
    pub fn new(
        series: Arc<SeriesInfo>,
        level: LevelGeometry,
        path: String,
        prior_path: Option<String>,
    ) -> Self {
        let total = level.tile_count();
        Self {
            series,
            level,
            path,
            prior_path,
            completed: AtomicU64::new(0),
            total,
        }
    }

    /// Tiles written so far.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    fn record_completion(&self) {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let step = (self.total / PROGRESS_STEPS).max(1);
        if done % step == 0 || done == self.total {
            info!(
                "Series {} resolution {}: {}/{} tiles written",
                self.level.series, self.level.resolution, done, self.total
            );
        }
    }
}

// =============================================================================
// Tile Writer
// =============================================================================

/// Produces and stores tiles.
///
/// Cheap to clone; every scheduled task carries its own clone.
pub struct TileWriter<R, C: ?Sized> {
    pool: Arc<ReaderPool<R>>,
    store: Arc<C>,
    downsampler: Arc<dyn Downsampler>,
}

impl<R, C: ?Sized> Clone for TileWriter<R, C> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            store: Arc::clone(&self.store),
            downsampler: Arc::clone(&self.downsampler),
        }
    }
}

impl<R, C> TileWriter<R, C>
where
    R: ImageReader + 'static,
    C: ChunkStore + ?Sized + 'static,
{
    pub fn new(
        pool: Arc<ReaderPool<R>>,
        store: Arc<C>,
        downsampler: Arc<dyn Downsampler>,
    ) -> Self {
        Self {
            pool,
            store,
            downsampler,
        }
    }

    /// Produce and write the chunk for `task`.
    ///
    /// Failures are logged with the task coordinates and returned unchanged.
    pub async fn write(&self, ctx: &LevelContext, task: TileTask) -> Result<(), ConvertError> {
        match self.write_inner(ctx, &task).await {
            Ok(()) => {
                ctx.record_completion();
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to write tile series={} resolution={} plane={} x={} y={} w={} h={}: {}",
                    task.series, task.resolution, task.plane, task.x, task.y, task.width, task.height, e
                );
                Err(e)
            }
        }
    }

    async fn write_inner(&self, ctx: &LevelContext, task: &TileTask) -> Result<(), ConvertError> {
        let position = ctx.series.grid_position(&ctx.level, task)?;
        debug!(
            "requesting tile to write at {} to {}",
            position, ctx.path
        );

        let start = Instant::now();
        let samples = match &ctx.prior_path {
            None => self.read_native(&ctx.series, task).await?,
            Some(prior_path) => {
                let zct = ctx.series.plane_coords(task.plane)?;
                reassemble(
                    self.store.as_ref(),
                    prior_path,
                    &ctx.series.axes,
                    zct,
                    task,
                    self.downsampler.as_ref(),
                )
                .await?
            }
        };
        let produced = start.elapsed();

        self.store
            .write_chunk(&ctx.path, position, Bytes::from(samples))
            .await?;
        debug!(
            "wrote tile {} of {} (produce {:?}, total {:?})",
            position,
            ctx.path,
            produced,
            start.elapsed()
        );
        Ok(())
    }

    /// Decode the tile from the source, normalized to big-endian samples.
    async fn read_native(
        &self,
        series: &SeriesInfo,
        task: &TileTask,
    ) -> Result<Vec<u8>, ConvertError> {
        let mut samples = {
            let mut reader = self.pool.acquire().await?;
            run_blocking(|| reader.open_region(task.plane, task.region()))?
        };

        let bps = series.pixel_type.bytes_per_sample();
        let expected = task.region().area() * bps;
        if samples.len() != expected {
            return Err(SourceError::RegionSize {
                expected,
                actual: samples.len(),
            }
            .into());
        }

        if series.little_endian && bps > 1 {
            for sample in samples.chunks_exact_mut(bps) {
                sample.reverse();
            }
        }
        Ok(samples)
    }
}
