//! Image source layer.
//!
//! This module provides the decoder-facing side of the converter: the
//! traits a format decoder implements, the pool that shares decoder handles
//! between workers, and a built-in decoder for plain raster images.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Tile tasks (resolution 0)       │
//! └────────────────────┬────────────────────┘
//!                      │ acquire / release
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              ReaderPool                 │
//! │  (one handle per worker, series switch  │
//! │   as a pool-wide barrier)               │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           ImageReader Trait             │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │     RasterReader (TIFF / PNG / JPEG)    │
//! └─────────────────────────────────────────┘
//! ```

mod pool;
mod raster;
mod reader;

pub use pool::{run_blocking, PooledReader, ReaderPool};
pub use raster::{RasterReader, RasterSource, DEFAULT_IMAGE_CACHE_CAPACITY};
pub use reader::{ImageReader, ImageSource, MetadataDocument, PixelType, Region};
