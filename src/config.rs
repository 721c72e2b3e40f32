//! Configuration management for the pyramid converter.
//!
//! This module provides the command-line surface of the converter:
//! - Command-line arguments via clap
//! - Environment variables with `PYRAMID_` prefix
//! - Defaults matching the standard pyramid layout
//!
//! # Example
//!
//! ```ignore
//! use wsi_pyramid::config::Config;
//!
//! let config = Config::parse();
//! config.validate()?;
//! let options = config.convert_options()?;
//! ```
//!
//! # Environment Variables
//!
//! - `PYRAMID_RESOLUTIONS` - Number of resolution levels (default: derived)
//! - `PYRAMID_TILE_WIDTH` / `PYRAMID_TILE_HEIGHT` - Tile size (default: 1024)
//! - `PYRAMID_MAX_WORKERS` - Tile workers (default: available parallelism)
//! - `PYRAMID_CACHE_SIZE` - Decoded images kept by the raster reader (default: 4)
//! - `PYRAMID_COMPRESSION` - `raw`, `gzip`, `bzip2`, `xz`, `lz4` or `blosc` (default: gzip)
//! - `PYRAMID_COMPRESSION_PARAMETER` - Level, preset or block size of the codec
//! - `PYRAMID_FILE_TYPE` - `n5` or `zarr` (default: n5)

use std::ops::RangeInclusive;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::error::ConfigError;
use crate::io::{
    Compression, ContainerKind, BLOSC_LEVELS, BZIP2_BLOCK_SIZES, GZIP_LEVELS, LZ4_BLOCK_SIZES,
    XZ_PRESETS,
};
use crate::pyramid::{
    validate_path_format, AxisOrder, ConvertOptions, DEFAULT_PATH_FORMAT, DEFAULT_TILE_SIZE,
    MIN_SIZE,
};
use crate::slide::DEFAULT_IMAGE_CACHE_CAPACITY;

// =============================================================================
// Default Values
// =============================================================================

/// Default worker count: one per available CPU.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// =============================================================================
// Value Enums
// =============================================================================

/// Chunk compression selectable on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    Blosc,
    Bzip2,
    Gzip,
    Lz4,
    Raw,
    Xz,
}

impl CompressionType {
    /// Name and accepted values of `--compression-parameter`.
    pub fn parameter_range(&self) -> Option<(&'static str, RangeInclusive<u32>)> {
        match self {
            CompressionType::Raw => None,
            CompressionType::Gzip => Some(("gzip level", GZIP_LEVELS)),
            CompressionType::Bzip2 => Some(("bzip2 block size", BZIP2_BLOCK_SIZES)),
            CompressionType::Xz => Some(("xz preset", XZ_PRESETS)),
            CompressionType::Lz4 => Some(("lz4 block size", LZ4_BLOCK_SIZES)),
            CompressionType::Blosc => Some(("blosc level", BLOSC_LEVELS)),
        }
    }
}

/// Output container kind selectable on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    N5,
    Zarr,
}

impl From<FileType> for ContainerKind {
    fn from(file_type: FileType) -> Self {
        match file_type {
            FileType::N5 => ContainerKind::N5,
            FileType::Zarr => ContainerKind::Zarr,
        }
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// WSI Pyramid - Convert whole slide images into chunked multi-resolution pyramids.
///
/// Reads an image once, writes its full resolution as chunks, then builds
/// every coarser level from the level below it.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-pyramid")]
#[command(author, version, about, long_about = None)]
#[command(disable_help_flag = true)]
pub struct Config {
    /// Input file or directory.
    pub input: PathBuf,

    /// Output directory.
    pub output: PathBuf,

    // =========================================================================
    // Pyramid Shape
    // =========================================================================
    /// Number of pyramid resolutions to generate.
    ///
    /// Derived from the image size when omitted.
    #[arg(short, long, env = "PYRAMID_RESOLUTIONS")]
    pub resolutions: Option<u32>,

    /// Maximum tile width to read.
    #[arg(short = 'w', long, default_value_t = DEFAULT_TILE_SIZE, env = "PYRAMID_TILE_WIDTH")]
    pub tile_width: u32,

    /// Maximum tile height to read.
    #[arg(short = 'h', long, default_value_t = DEFAULT_TILE_SIZE, env = "PYRAMID_TILE_HEIGHT")]
    pub tile_height: u32,

    /// Override the input file dimension order (e.g. XYCZT).
    #[arg(long, env = "PYRAMID_DIMENSION_ORDER")]
    pub dimension_order: Option<String>,

    // =========================================================================
    // Execution
    // =========================================================================
    /// Maximum number of workers.
    #[arg(long, default_value_t = default_worker_count(), env = "PYRAMID_MAX_WORKERS")]
    pub max_workers: usize,

    /// Maximum number of decoded images cached by the reader.
    #[arg(long, default_value_t = DEFAULT_IMAGE_CACHE_CAPACITY, env = "PYRAMID_CACHE_SIZE")]
    pub cache_size: usize,

    // =========================================================================
    // Output
    // =========================================================================
    /// Compression type for chunks.
    #[arg(short, long, value_enum, default_value_t = CompressionType::Gzip, env = "PYRAMID_COMPRESSION")]
    pub compression: CompressionType,

    /// Integer parameter for the chosen compression (gzip level, bzip2 block
    /// size, xz preset, lz4 block size or blosc level).
    #[arg(long, env = "PYRAMID_COMPRESSION_PARAMETER")]
    pub compression_parameter: Option<u32>,

    /// Type of output container.
    #[arg(long, value_enum, default_value_t = FileType::N5, env = "PYRAMID_FILE_TYPE")]
    pub file_type: FileType,

    /// Name of the pyramid container (default: data.n5 or data.zarr).
    #[arg(long, env = "PYRAMID_NAME")]
    pub pyramid_name: Option<String>,

    /// Format string for dataset paths within the container.
    #[arg(long, default_value = DEFAULT_PATH_FORMAT, env = "PYRAMID_SCALE_FORMAT_STRING")]
    pub scale_format_string: String,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Turn on debug logging.
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// Print help.
    #[arg(long, action = clap::ArgAction::Help)]
    pub help: Option<bool>,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err("tile width and height must be greater than 0".to_string());
        }
        if self.max_workers == 0 {
            return Err("max_workers must be greater than 0".to_string());
        }
        if self.cache_size == 0 {
            return Err("cache_size must be greater than 0".to_string());
        }
        if self.resolutions == Some(0) {
            return Err("resolutions must be greater than 0".to_string());
        }

        if let (Some((name, range)), Some(value)) = (
            self.compression.parameter_range(),
            self.compression_parameter,
        ) {
            if !range.contains(&value) {
                return Err(format!(
                    "{} must be between {} and {}, got {}",
                    name,
                    range.start(),
                    range.end(),
                    value
                ));
            }
        }

        if let Some(name) = &self.pyramid_name {
            if name.is_empty() || name.contains('/') || name.contains('\\') {
                return Err(format!("Invalid pyramid name '{}'", name));
            }
        }

        validate_path_format(&self.scale_format_string).map_err(|e| e.to_string())?;
        self.axis_order().map_err(|e| e.to_string())?;

        Ok(())
    }

    pub fn container_kind(&self) -> ContainerKind {
        self.file_type.into()
    }

    /// Pyramid container name, defaulting per container kind.
    pub fn pyramid_name(&self) -> String {
        self.pyramid_name
            .clone()
            .unwrap_or_else(|| self.container_kind().default_pyramid_name().to_string())
    }

    /// Root directory of the chunk store.
    pub fn store_root(&self) -> PathBuf {
        self.output.join(self.pyramid_name())
    }

    /// Whether the output follows the default name and path layout.
    pub fn uses_default_layout(&self) -> bool {
        self.pyramid_name() == self.container_kind().default_pyramid_name()
            && self.scale_format_string == DEFAULT_PATH_FORMAT
    }

    pub fn compression(&self) -> Compression {
        match self.compression {
            CompressionType::Raw => Compression::Raw,
            CompressionType::Gzip => Compression::gzip(self.compression_parameter),
            CompressionType::Bzip2 => Compression::bzip2(self.compression_parameter),
            CompressionType::Xz => Compression::xz(self.compression_parameter),
            CompressionType::Lz4 => Compression::lz4(self.compression_parameter),
            CompressionType::Blosc => Compression::blosc(self.compression_parameter),
        }
    }

    /// Parsed `--dimension-order`, if given.
    pub fn axis_order(&self) -> Result<Option<AxisOrder>, ConfigError> {
        self.dimension_order
            .as_deref()
            .map(AxisOrder::parse)
            .transpose()
    }

    /// Options for [`PyramidConverter`](crate::pyramid::PyramidConverter).
    pub fn convert_options(&self) -> Result<ConvertOptions, ConfigError> {
        Ok(ConvertOptions {
            resolutions: self.resolutions,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            worker_count: self.max_workers,
            min_size: MIN_SIZE,
            path_format: self.scale_format_string.clone(),
            axis_order: self.axis_order()?,
            compression: self.compression(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
