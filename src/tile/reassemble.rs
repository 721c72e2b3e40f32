//! Downsample reassembly.
//!
//! A tile of level `r` is built from the already-written chunks of level
//! `r - 1`, never from the source image:
//!
//! ```text
//!   level r-1 (prior)                         level r
//!  ┌────────┬────────┬──────┐
//!  │ chunk  │ chunk  │      │   source window      ┌────┐
//!  │  ┌─────┼────┐   │      │   (2x, 2y, 2w, 2h)   │tile│
//!  ├──┼─────┼────┼───┼──────┤  ────────────────►   └────┘
//!  │  └─────┼────┘   │      │   assemble + box
//!  │        │        │      │   filter (factor 2)
//!  └────────┴────────┴──────┘
//! ```
//!
//! The window may straddle several prior chunks; every covered chunk is read
//! and its overlapping rows copied into one contiguous buffer before the
//! downsampler runs.

use tracing::debug;

use crate::error::{ConvertError, SourceError, StoreError};
use crate::io::{ChunkStore, DatasetAttributes, GridPosition};
use crate::pyramid::{AxisOrder, SCALE_FACTOR};

use super::downsample::Downsampler;
use super::task::TileTask;

/// Region of the prior level feeding one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceWindow {
    pub x: u64,
    pub y: u64,
    pub width: u64,
    pub height: u64,
}

impl SourceWindow {
    /// Window of the prior level covering `task`, clipped to the prior extent.
    pub fn for_task(task: &TileTask, prior: &DatasetAttributes) -> Result<Self, SourceError> {
        let factor = SCALE_FACTOR as u64;
        let (prior_width, prior_height) = (prior.shape[0], prior.shape[1]);
        let x = task.x as u64 * factor;
        let y = task.y as u64 * factor;

        let out_of_bounds = || SourceError::RegionOutOfBounds {
            x: x as u32,
            y: y as u32,
            width: task.width * SCALE_FACTOR,
            height: task.height * SCALE_FACTOR,
            size_x: prior_width as u32,
            size_y: prior_height as u32,
        };
        let width = (task.width as u64 * factor).min(
            prior_width
                .checked_sub(x)
                .filter(|&w| w > 0)
                .ok_or_else(out_of_bounds)?,
        );
        let height = (task.height as u64 * factor).min(
            prior_height
                .checked_sub(y)
                .filter(|&h| h > 0)
                .ok_or_else(out_of_bounds)?,
        );

        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }
}

/// Build the samples of `task` from the prior level stored at `prior_path`.
///
/// `zct` is the plane coordinate of the task; the prior level holds the
/// same plane at the same Z/C/T grid coordinate.
pub async fn reassemble<C: ChunkStore + ?Sized>(
    store: &C,
    prior_path: &str,
    axes: &AxisOrder,
    zct: [u32; 3],
    task: &TileTask,
    downsampler: &dyn Downsampler,
) -> Result<Vec<u8>, ConvertError> {
    let prior = store.dataset_attributes(prior_path).await?;
    let window = SourceWindow::for_task(task, &prior)?;
    let bps = prior.data_type.bytes_per_sample();

    let chunk_width = prior.chunk_shape[0].max(1) as u64;
    let chunk_height = prior.chunk_shape[1].max(1) as u64;
    let zct = [zct[0] as u64, zct[1] as u64, zct[2] as u64];

    let stride = window.width as usize * bps;
    let mut buffer = vec![0u8; stride * window.height as usize];

    let first_cx = window.x / chunk_width;
    let last_cx = (window.x + window.width - 1) / chunk_width;
    let first_cy = window.y / chunk_height;
    let last_cy = (window.y + window.height - 1) / chunk_height;

    for cy in first_cy..=last_cy {
        for cx in first_cx..=last_cx {
            let position = GridPosition(axes.place(cx, cy, zct));
            let chunk = store.read_chunk(prior_path, position).await?;

            let expected = prior.chunk_len(&position);
            if chunk.len() != expected {
                return Err(StoreError::ChunkSize {
                    path: prior_path.to_string(),
                    position: position.to_string(),
                    expected,
                    actual: chunk.len(),
                }
                .into());
            }

            let extent = prior.chunk_extent(&position);
            let origin_x = cx * chunk_width;
            let origin_y = cy * chunk_height;
            let chunk_stride = extent[0] as usize * bps;

            let x0 = window.x.max(origin_x);
            let x1 = (window.x + window.width).min(origin_x + extent[0] as u64);
            let y0 = window.y.max(origin_y);
            let y1 = (window.y + window.height).min(origin_y + extent[1] as u64);
            if x0 >= x1 || y0 >= y1 {
                continue;
            }
            let len = (x1 - x0) as usize * bps;

            for row in y0..y1 {
                let src = (row - origin_y) as usize * chunk_stride + (x0 - origin_x) as usize * bps;
                let dst = (row - window.y) as usize * stride + (x0 - window.x) as usize * bps;
                buffer[dst..dst + len].copy_from_slice(&chunk[src..src + len]);
            }
        }
    }

    debug!(
        "Reassembled {}x{} window at ({}, {}) from {} chunk(s) of {}",
        window.width,
        window.height,
        window.x,
        window.y,
        (last_cx - first_cx + 1) * (last_cy - first_cy + 1),
        prior_path
    );

    let samples = downsampler.downsample(
        &buffer,
        window.width as u32,
        window.height as u32,
        prior.data_type,
        SCALE_FACTOR,
    );

    let expected = task.width as usize * task.height as usize * bps;
    if samples.len() != expected {
        return Err(SourceError::RegionSize {
            expected,
            actual: samples.len(),
        }
        .into());
    }
    Ok(samples)
}
