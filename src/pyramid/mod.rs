//! Pyramid construction.
//!
//! This module owns the conversion itself: axis mapping, level geometry, the
//! bounded tile scheduler and the driver that ties them together.
//!
//! # Components
//!
//! - [`AxisOrder`]: maps X, Y, Z, C, T onto the five storage slots
//! - [`SeriesInfo`] / [`LevelGeometry`]: per-series and per-level geometry
//! - [`BoundedScheduler`]: `W` workers, queue of `W`, completion tokens
//! - [`PyramidConverter`]: the top-level state machine
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use wsi_pyramid::io::{ContainerKind, FilesystemStore};
//! use wsi_pyramid::pyramid::{ConvertOptions, PyramidConverter};
//! use wsi_pyramid::slide::RasterSource;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(FilesystemStore::new("out/data.n5", ContainerKind::N5));
//!     let converter = PyramidConverter::new(RasterSource::new(), store, ConvertOptions::default());
//!
//!     let summary = converter
//!         .convert(Path::new("slide.tif"), Path::new("out"))
//!         .await
//!         .unwrap();
//!     println!("{} tiles written", summary.tiles_written);
//! }
//! ```

mod axes;
mod driver;
mod levels;
mod scheduler;

pub use axes::{AxisOrder, DEFAULT_AXIS_ORDER};
pub use driver::{
    ConversionSummary, ConvertOptions, DriverState, PyramidConverter, DEFAULT_TILE_SIZE,
};
pub use levels::{
    dataset_path, resolution_count, validate_path_format, LevelGeometry, SeriesInfo,
    DEFAULT_PATH_FORMAT, LAYOUT_ATTRIBUTE, LAYOUT_VERSION, MIN_SIZE, SCALE_FACTOR,
};
pub use scheduler::{BoundedScheduler, CompletionToken, LevelJoin};
