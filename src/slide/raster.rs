//! Raster image source backed by the `image` crate.
//!
//! Decodes standard raster files (TIFF, PNG, JPEG). The input path is either a
//! single file, which becomes series 0, or a directory whose supported files,
//! sorted by name, become one series each.
//!
//! Channels are separated into planes: an RGB image has `sizeC = 3` and three
//! planes, in `XYCZT` order. Decoded images are shared by every handle opened
//! for the same input through an LRU cache, so switching the whole pool to a
//! new series decodes the file once.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::{ColorType, ImageDecoder};
use lru::LruCache;
use serde::Serialize;
use tracing::debug;

use crate::error::SourceError;

use super::reader::{ImageReader, ImageSource, MetadataDocument, PixelType, Region};

/// Default number of decoded images kept in memory.
pub const DEFAULT_IMAGE_CACHE_CAPACITY: usize = 4;

/// File extensions this source will pick up.
const SUPPORTED_EXTENSIONS: &[&str] = &["tif", "tiff", "png", "jpg", "jpeg"];

/// Axis order of every raster series.
const RASTER_DIMENSION_ORDER: &str = "XYCZT";

// =============================================================================
// Decoded Image
// =============================================================================

/// A fully decoded image with interleaved channels in host byte order.
#[derive(Debug)]
struct DecodedImage {
    width: u32,
    height: u32,
    channels: u32,
    pixel_type: PixelType,
    data: Vec<u8>,
}

fn pixel_type_for(color: ColorType) -> Result<PixelType, SourceError> {
    match color {
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => {
            Ok(PixelType::Uint8)
        }
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => {
            Ok(PixelType::Uint16)
        }
        ColorType::Rgb32F | ColorType::Rgba32F => Ok(PixelType::Float),
        other => Err(SourceError::Decode(format!(
            "unsupported color type {:?}",
            other
        ))),
    }
}

fn io_error(path: &Path, err: std::io::Error) -> SourceError {
    SourceError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn decode_error(path: &Path, err: image::ImageError) -> SourceError {
    SourceError::Decode(format!("{}: {}", path.display(), err))
}

fn decode(path: &Path) -> Result<DecodedImage, SourceError> {
    let img = image::ImageReader::open(path)
        .map_err(|e| io_error(path, e))?
        .with_guessed_format()
        .map_err(|e| io_error(path, e))?
        .decode()
        .map_err(|e| decode_error(path, e))?;

    let color = img.color();
    Ok(DecodedImage {
        width: img.width(),
        height: img.height(),
        channels: color.channel_count() as u32,
        pixel_type: pixel_type_for(color)?,
        data: img.as_bytes().to_vec(),
    })
}

/// Header-only description of one series.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SeriesHeader {
    name: String,
    format: String,
    size_x: u32,
    size_y: u32,
    size_c: u32,
    pixel_type: String,
}

fn read_header(path: &Path) -> Result<SeriesHeader, SourceError> {
    let reader = image::ImageReader::open(path)
        .map_err(|e| io_error(path, e))?
        .with_guessed_format()
        .map_err(|e| io_error(path, e))?;

    let format = reader
        .format()
        .map(|f| format!("{:?}", f))
        .ok_or_else(|| SourceError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: "unrecognised image format".to_string(),
        })?;

    let decoder = reader.into_decoder().map_err(|e| decode_error(path, e))?;
    let (size_x, size_y) = decoder.dimensions();
    let color = decoder.color_type();

    Ok(SeriesHeader {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        format,
        size_x,
        size_y,
        size_c: color.channel_count() as u32,
        pixel_type: pixel_type_for(color)?.to_string(),
    })
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Resolve the list of series files for an input path.
fn list_series(path: &Path) -> Result<Vec<PathBuf>, SourceError> {
    if path.is_dir() {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path).map_err(|e| io_error(path, e))? {
            let entry = entry.map_err(|e| io_error(path, e))?;
            let file = entry.path();
            if file.is_file() && is_supported(&file) {
                files.push(file);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(SourceError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: "directory contains no supported image files".to_string(),
            });
        }
        Ok(files)
    } else if is_supported(path) {
        Ok(vec![path.to_path_buf()])
    } else {
        Err(SourceError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: format!("expected one of: {}", SUPPORTED_EXTENSIONS.join(", ")),
        })
    }
}

// =============================================================================
// Shared Decode Cache
// =============================================================================

/// Per-input state shared by every handle.
struct SharedImages {
    files: Vec<PathBuf>,
    format: String,
    images: Mutex<LruCache<usize, Arc<DecodedImage>>>,
}

impl SharedImages {
    fn get(&self, series: usize) -> Result<Arc<DecodedImage>, SourceError> {
        let path = self
            .files
            .get(series)
            .ok_or(SourceError::SeriesOutOfRange {
                series,
                count: self.files.len(),
            })?;

        // Decoding happens under the lock so concurrent callers for the same
        // series wait for one decode instead of repeating it
        let mut images = self.images.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(image) = images.get(&series) {
            return Ok(Arc::clone(image));
        }

        debug!("Decoding series {} from {}", series, path.display());
        let image = Arc::new(decode(path)?);
        images.put(series, Arc::clone(&image));
        Ok(image)
    }
}

// =============================================================================
// Raster Source
// =============================================================================

/// [`ImageSource`] for standard raster files.
pub struct RasterSource {
    cache_capacity: NonZeroUsize,
    inputs: Mutex<HashMap<PathBuf, Arc<SharedImages>>>,
}

impl RasterSource {
    /// Create a source with the default decoded-image cache size.
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_IMAGE_CACHE_CAPACITY)
    }

    /// Create a source keeping up to `capacity` decoded images in memory.
    pub fn with_cache_capacity(capacity: usize) -> Self {
        Self {
            cache_capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            inputs: Mutex::new(HashMap::new()),
        }
    }

    fn shared(&self, path: &Path) -> Result<Arc<SharedImages>, SourceError> {
        let mut inputs = self.inputs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(shared) = inputs.get(path) {
            return Ok(Arc::clone(shared));
        }

        let files = list_series(path)?;
        let format = read_header(&files[0])?.format;
        let shared = Arc::new(SharedImages {
            files,
            format,
            images: Mutex::new(LruCache::new(self.cache_capacity)),
        });
        inputs.insert(path.to_path_buf(), Arc::clone(&shared));
        Ok(shared)
    }
}

impl Default for RasterSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageSource for RasterSource {
    type Reader = RasterReader;

    fn open(&self, path: &Path) -> Result<RasterReader, SourceError> {
        let shared = self.shared(path)?;
        let image = shared.get(0)?;
        Ok(RasterReader {
            shared,
            series: 0,
            image,
        })
    }
}

// =============================================================================
// Raster Reader
// =============================================================================

/// One handle onto a raster input.
pub struct RasterReader {
    shared: Arc<SharedImages>,
    series: usize,
    image: Arc<DecodedImage>,
}

impl ImageReader for RasterReader {
    fn format_name(&self) -> &str {
        &self.shared.format
    }

    fn series_count(&self) -> usize {
        self.shared.files.len()
    }

    fn set_series(&mut self, series: usize) -> Result<(), SourceError> {
        if series != self.series {
            self.image = self.shared.get(series)?;
            self.series = series;
        }
        Ok(())
    }

    fn series(&self) -> usize {
        self.series
    }

    fn size_x(&self) -> u32 {
        self.image.width
    }

    fn size_y(&self) -> u32 {
        self.image.height
    }

    fn size_z(&self) -> u32 {
        1
    }

    fn size_c(&self) -> u32 {
        self.image.channels
    }

    fn size_t(&self) -> u32 {
        1
    }

    fn image_count(&self) -> u32 {
        self.image.channels
    }

    fn pixel_type(&self) -> PixelType {
        self.image.pixel_type
    }

    fn is_little_endian(&self) -> bool {
        cfg!(target_endian = "little")
    }

    fn dimension_order(&self) -> &str {
        RASTER_DIMENSION_ORDER
    }

    fn plane_coords(&self, plane: u32) -> Result<[u32; 3], SourceError> {
        let count = self.image_count();
        if plane >= count {
            return Err(SourceError::PlaneOutOfRange { plane, count });
        }
        let size_c = self.size_c();
        let size_z = self.size_z();
        Ok([
            (plane / size_c) % size_z,
            plane % size_c,
            plane / (size_c * size_z),
        ])
    }

    fn open_region(&mut self, plane: u32, region: Region) -> Result<Vec<u8>, SourceError> {
        let [_, channel, _] = self.plane_coords(plane)?;
        let image = &self.image;
        if !region.fits_within(image.width, image.height) {
            return Err(SourceError::RegionOutOfBounds {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                size_x: image.width,
                size_y: image.height,
            });
        }

        let bps = image.pixel_type.bytes_per_sample();
        let pixel_stride = image.channels as usize * bps;
        let channel_offset = channel as usize * bps;

        let mut out = Vec::with_capacity(region.area() * bps);
        for row in region.y..region.y + region.height {
            let row_start = (row as usize * image.width as usize + region.x as usize)
                * pixel_stride
                + channel_offset;
            for col in 0..region.width as usize {
                let at = row_start + col * pixel_stride;
                out.extend_from_slice(&image.data[at..at + bps]);
            }
        }
        Ok(out)
    }

    fn metadata_document(&self) -> Result<MetadataDocument, SourceError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Description<'a> {
            dimension_order: &'a str,
            little_endian: bool,
            series: Vec<SeriesHeader>,
        }

        let series = self
            .shared
            .files
            .iter()
            .map(|path| read_header(path))
            .collect::<Result<Vec<_>, _>>()?;

        let description = Description {
            dimension_order: RASTER_DIMENSION_ORDER,
            little_endian: self.is_little_endian(),
            series,
        };
        let contents = serde_json::to_string_pretty(&description)
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        Ok(MetadataDocument {
            extension: "json".to_string(),
            contents,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
