//! Tile production layer.
//!
//! This module turns one level of the pyramid into independent tile tasks
//! and provides the work each task performs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   LevelGeometry::tasks() → TileTask     │
//! └────────────────────┬────────────────────┘
//!                      │ (scheduled)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              TileWriter                 │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ resolution 0 │  │ resolution > 0  │  │
//! │  │ ReaderPool → │  │ reassemble()    │  │
//! │  │ open_region  │  │ + Downsampler   │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ write_chunk
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              ChunkStore                 │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileTask`]: one chunk's worth of work, with its level coordinates
//! - [`TileTasks`]: lazy enumeration of a level, clipped at the edges
//! - [`Downsampler`] / [`BoxFilter`]: pluggable reduction by an integer factor
//! - [`reassemble`]: builds a tile from the prior level's chunks
//! - [`TileWriter`]: the body of every scheduled task

mod downsample;
mod reassemble;
mod task;
mod writer;

pub use downsample::{BoxFilter, Downsampler};
pub use reassemble::{reassemble, SourceWindow};
pub use task::{TileTask, TileTasks};
pub use writer::{LevelContext, TileWriter};
