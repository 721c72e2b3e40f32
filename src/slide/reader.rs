//! Image source capability.
//!
//! This module defines the traits through which the converter talks to a
//! format-specific decoder:
//!
//! - [`ImageSource`] opens decoder handles for an input path
//! - [`ImageReader`] is one open handle, with a mutable "current series"
//!
//! Handles are expensive to create (open + format probe), so the converter
//! opens a fixed number of them at startup and shares them through a
//! [`ReaderPool`](super::ReaderPool).

use std::fmt;
use std::path::Path;

use crate::error::SourceError;

// =============================================================================
// Pixel Type
// =============================================================================

/// Sample type reported by a decoder.
///
/// Only the 8 and 16-bit integer types can be written to a pyramid; the rest
/// exist so a decoder can describe its input honestly and let the converter
/// reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float,
    Double,
    Bit,
}

impl PixelType {
    /// Number of bytes used by one sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            PixelType::Int8 | PixelType::Uint8 | PixelType::Bit => 1,
            PixelType::Int16 | PixelType::Uint16 => 2,
            PixelType::Int32 | PixelType::Uint32 | PixelType::Float => 4,
            PixelType::Double => 8,
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelType::Int8 => "int8",
            PixelType::Uint8 => "uint8",
            PixelType::Int16 => "int16",
            PixelType::Uint16 => "uint16",
            PixelType::Int32 => "int32",
            PixelType::Uint32 => "uint32",
            PixelType::Float => "float",
            PixelType::Double => "double",
            PixelType::Bit => "bit",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Region / Metadata
// =============================================================================

/// A rectangular pixel region within one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Number of pixels covered by the region.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether the region fits inside an image of the given size.
    pub fn fits_within(&self, size_x: u32, size_y: u32) -> bool {
        self.x as u64 + self.width as u64 <= size_x as u64
            && self.y as u64 + self.height as u64 <= size_y as u64
    }
}

/// The shared metadata document describing the whole input.
///
/// Written once at the root of the output as `METADATA.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataDocument {
    /// File extension, without the leading dot (e.g. `json`, `ome.xml`)
    pub extension: String,

    /// Document body
    pub contents: String,
}

// =============================================================================
// Reader Traits
// =============================================================================

/// One open decoder handle bound to an input file.
///
/// All size accessors describe the current series, selected with
/// [`set_series`](ImageReader::set_series). Region bytes are returned in the
/// decoder's native byte order, see [`is_little_endian`](ImageReader::is_little_endian).
pub trait ImageReader: Send {
    /// Human-readable name of the decoder that recognised the input.
    fn format_name(&self) -> &str;

    /// Number of series (independent images) in the input.
    fn series_count(&self) -> usize;

    /// Select the series all following calls refer to.
    fn set_series(&mut self, series: usize) -> Result<(), SourceError>;

    /// Index of the currently selected series.
    fn series(&self) -> usize;

    fn size_x(&self) -> u32;
    fn size_y(&self) -> u32;
    fn size_z(&self) -> u32;
    fn size_c(&self) -> u32;
    fn size_t(&self) -> u32;

    /// Number of planes in the current series.
    fn image_count(&self) -> u32;

    fn pixel_type(&self) -> PixelType;

    /// Byte order of multi-byte samples returned by `open_region`.
    fn is_little_endian(&self) -> bool;

    /// Axis order declared by the input, e.g. `XYCZT`.
    fn dimension_order(&self) -> &str;

    /// Map a plane index to its `(z, c, t)` coordinate.
    fn plane_coords(&self, plane: u32) -> Result<[u32; 3], SourceError>;

    /// Decode one region of one plane.
    ///
    /// Returns `width * height * bytes_per_sample` bytes, row-major.
    fn open_region(&mut self, plane: u32, region: Region) -> Result<Vec<u8>, SourceError>;

    /// Produce the shared metadata document for the whole input.
    fn metadata_document(&self) -> Result<MetadataDocument, SourceError>;

    /// Release decoder resources. Called once at shutdown.
    fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Factory for decoder handles.
pub trait ImageSource: Send + Sync {
    /// The handle type this source opens.
    type Reader: ImageReader + 'static;

    /// Open and probe a new handle for `path`.
    ///
    /// Each call performs full decoder initialization; callers are expected
    /// to open handles once and reuse them.
    fn open(&self, path: &Path) -> Result<Self::Reader, SourceError>;
}

// =============================================================================
// Tests
// =============================================================================
