//! # WSI Pyramid
//!
//! Converts one very large whole slide image into a multi-resolution,
//! chunked array pyramid on disk, so viewers can fetch the tiles of one zoom
//! level without decoding the whole image.
//!
//! ## Features
//!
//! - **Resolution cascade**: every coarser level is built from the chunks
//!   already written for the level below, never from the source image
//! - **Bounded concurrency**: a fixed worker pool with a bounded queue keeps
//!   memory flat no matter how many tiles a level has
//! - **Pooled decoders**: one decoder handle per worker, opened once
//! - **Two containers**: N5 and Zarr v2 layouts behind one chunk store
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`slide`] - Image source traits, the reader pool and a raster decoder
//! - [`io`] - Chunk store trait, codecs and the filesystem store
//! - [`tile`] - Tile tasks, downsampling and reassembly
//! - [`pyramid`] - Axis mapping, level geometry, scheduler and driver
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use wsi_pyramid::{ContainerKind, ConvertOptions, FilesystemStore, PyramidConverter, RasterSource};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(FilesystemStore::new("out/data.zarr", ContainerKind::Zarr));
//!     let options = ConvertOptions {
//!         tile_width: 512,
//!         tile_height: 512,
//!         ..Default::default()
//!     };
//!
//!     let converter = PyramidConverter::new(RasterSource::new(), store, options);
//!     converter
//!         .convert(Path::new("slide.tif"), Path::new("out"))
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod pyramid;
pub mod slide;
pub mod tile;

// Re-export commonly used types
pub use config::{CompressionType, Config, FileType};
pub use error::{ConfigError, ConvertError, SourceError, StoreError};
pub use io::{
    ChunkStore, Compression, ContainerKind, DataType, DatasetAttributes, FilesystemStore,
    GridPosition,
};
pub use pyramid::{
    AxisOrder, BoundedScheduler, ConversionSummary, ConvertOptions, PyramidConverter,
};
pub use slide::{
    ImageReader, ImageSource, MetadataDocument, PixelType, RasterReader, RasterSource,
    ReaderPool, Region,
};
pub use tile::{BoxFilter, Downsampler, TileTask};
