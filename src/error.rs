use std::path::PathBuf;

use thiserror::Error;

use crate::slide::PixelType;

/// Errors raised by an image source while opening or decoding the input.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The input could not be read from disk
    #[error("I/O error reading {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// No decoder recognises the input
    #[error("Unsupported input {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// The decoder recognised the input but failed to decode it
    #[error("Decode error: {0}")]
    Decode(String),

    /// Requested series does not exist
    #[error("Series {series} out of range (series count is {count})")]
    SeriesOutOfRange { series: usize, count: usize },

    /// Requested plane does not exist in the current series
    #[error("Plane {plane} out of range (image count is {count})")]
    PlaneOutOfRange { plane: u32, count: u32 },

    /// Requested region extends past the image bounds
    #[error(
        "Region {width}x{height} at ({x}, {y}) exceeds image bounds {size_x}x{size_y}"
    )]
    RegionOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        size_x: u32,
        size_y: u32,
    },

    /// Decoder returned fewer or more bytes than the region requires
    #[error("Region returned {actual} bytes, expected {expected}")]
    RegionSize { expected: usize, actual: usize },
}

/// Errors raised by a chunk store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Filesystem error, with the path that failed
    #[error("I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// Dataset has not been created
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    /// Dataset or group attributes could not be parsed or serialized
    #[error("Invalid attributes at {path}: {message}")]
    Attributes { path: PathBuf, message: String },

    /// Grid position lies outside the dataset's chunk grid
    #[error("Grid position {position} outside chunk grid of {path}")]
    GridOutOfRange { path: String, position: String },

    /// Chunk payload does not match the expected extent
    #[error("Chunk {position} of {path} has {actual} bytes, expected {expected}")]
    ChunkSize {
        path: String,
        position: String,
        expected: usize,
        actual: usize,
    },

    /// Compression or decompression failed
    #[error("Codec error: {0}")]
    Codec(String),
}

impl StoreError {
    /// Wrap a `std::io::Error` with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Configuration errors. These are detected before any tile is scheduled.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Pixel type outside the supported 8/16-bit integer set
    #[error("Unsupported pixel type: {0}")]
    UnsupportedPixelType(PixelType),

    /// Axis order string is not a valid X,Y,Z,C,T ordering
    #[error("Invalid axis order '{order}': {reason}")]
    InvalidAxisOrder { order: String, reason: String },

    /// Dataset path format is missing a placeholder
    #[error("Invalid path format '{0}': must contain {{series}} and {{resolution}}")]
    InvalidPathFormat(String),

    /// Resolution would have a zero extent in X or Y
    #[error("Resolution {resolution} of series {series} has zero extent ({width}x{height})")]
    EmptyResolution {
        series: usize,
        resolution: u32,
        width: u32,
        height: u32,
    },

    /// Any other invalid option
    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

/// Top-level conversion error.
///
/// Task failures are carried here with their original cause; the driver
/// re-raises the first one observed at a level barrier.
#[derive(Debug, Clone, Error)]
pub enum ConvertError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A pool or queue wait was cut short because the pool was closed
    #[error("Interrupted while waiting for {0}")]
    Interrupted(&'static str),

    /// A worker exited without reporting its task's result
    #[error("Worker exited before reporting a result for a tile task")]
    WorkerLost,
}
