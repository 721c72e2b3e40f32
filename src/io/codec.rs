//! Chunk compression codecs.
//!
//! Every codec takes one optional integer parameter, the same one accepted by
//! `--compression-parameter`:
//!
//! | Codec   | Parameter             | Range        | Default |
//! |---------|-----------------------|--------------|---------|
//! | `gzip`  | deflate level         | 0..=9        | 6       |
//! | `bzip2` | block size (x 100 kB) | 1..=9        | 9       |
//! | `xz`    | preset                | 0..=9        | 6       |
//! | `lz4`   | block size in bytes   | 1..=4 MiB    | 65536   |
//! | `blosc` | compression level     | 0..=9        | 5       |
//!
//! `lz4` chunks are LZ4 frames; the block size is rounded up to the nearest
//! frame block size. `blosc` always uses the `lz4` internal compressor with
//! byte shuffling over the sample size.

use std::ffi::{c_char, c_int};
use std::io::{Read, Write};
use std::ops::RangeInclusive;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use lz4_flex::frame::{BlockSize, FrameDecoder, FrameEncoder, FrameInfo};

use crate::error::StoreError;

/// Default gzip level when none is configured.
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// Highest gzip level accepted.
pub const MAX_GZIP_LEVEL: u32 = 9;

pub const DEFAULT_BZIP2_BLOCK_SIZE: u32 = 9;
pub const DEFAULT_XZ_PRESET: u32 = 6;
pub const DEFAULT_LZ4_BLOCK_SIZE: u32 = 65536;
pub const DEFAULT_BLOSC_LEVEL: u32 = 5;

/// Accepted parameter values per codec.
pub const GZIP_LEVELS: RangeInclusive<u32> = 0..=MAX_GZIP_LEVEL;
pub const BZIP2_BLOCK_SIZES: RangeInclusive<u32> = 1..=9;
pub const XZ_PRESETS: RangeInclusive<u32> = 0..=9;
pub const LZ4_BLOCK_SIZES: RangeInclusive<u32> = 1..=4 * 1024 * 1024;
pub const BLOSC_LEVELS: RangeInclusive<u32> = 0..=9;

/// Internal compressor used by blosc, NUL-terminated for the C API.
const BLOSC_COMPRESSOR: &[u8] = b"lz4\0";
pub const BLOSC_COMPRESSOR_NAME: &str = "lz4";
const BLOSC_BYTE_SHUFFLE: c_int = 1;

/// Compression applied to every chunk of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Chunks are stored uncompressed
    Raw,

    /// Chunks are gzip streams
    Gzip { level: u32 },

    /// Chunks are bzip2 streams
    Bzip2 { block_size: u32 },

    /// Chunks are xz streams
    Xz { preset: u32 },

    /// Chunks are LZ4 frames
    Lz4 { block_size: u32 },

    /// Chunks are blosc buffers
    Blosc { level: u32 },
}

fn clamp(value: Option<u32>, default: u32, range: RangeInclusive<u32>) -> u32 {
    value
        .unwrap_or(default)
        .clamp(*range.start(), *range.end())
}

fn codec_error(codec: &str, action: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Codec(format!("{} {}: {}", codec, action, err))
}

impl Compression {
    /// Gzip with an optional level, falling back to [`DEFAULT_GZIP_LEVEL`].
    pub fn gzip(level: Option<u32>) -> Self {
        Compression::Gzip {
            level: clamp(level, DEFAULT_GZIP_LEVEL, GZIP_LEVELS),
        }
    }

    pub fn bzip2(block_size: Option<u32>) -> Self {
        Compression::Bzip2 {
            block_size: clamp(block_size, DEFAULT_BZIP2_BLOCK_SIZE, BZIP2_BLOCK_SIZES),
        }
    }

    pub fn xz(preset: Option<u32>) -> Self {
        Compression::Xz {
            preset: clamp(preset, DEFAULT_XZ_PRESET, XZ_PRESETS),
        }
    }

    pub fn lz4(block_size: Option<u32>) -> Self {
        Compression::Lz4 {
            block_size: clamp(block_size, DEFAULT_LZ4_BLOCK_SIZE, LZ4_BLOCK_SIZES),
        }
    }

    pub fn blosc(level: Option<u32>) -> Self {
        Compression::Blosc {
            level: clamp(level, DEFAULT_BLOSC_LEVEL, BLOSC_LEVELS),
        }
    }

    /// Codec name as used on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Compression::Raw => "raw",
            Compression::Gzip { .. } => "gzip",
            Compression::Bzip2 { .. } => "bzip2",
            Compression::Xz { .. } => "xz",
            Compression::Lz4 { .. } => "lz4",
            Compression::Blosc { .. } => "blosc",
        }
    }

    /// Compress one chunk of samples `element_size` bytes wide.
    pub fn compress(&self, data: &[u8], element_size: usize) -> Result<Vec<u8>, StoreError> {
        match *self {
            Compression::Raw => Ok(data.to_vec()),
            Compression::Gzip { level } => {
                let mut encoder = GzEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    flate2::Compression::new(level),
                );
                encoder
                    .write_all(data)
                    .map_err(|e| codec_error("gzip", "encode", e))?;
                encoder
                    .finish()
                    .map_err(|e| codec_error("gzip", "encode", e))
            }
            Compression::Bzip2 { block_size } => {
                let mut encoder = bzip2::write::BzEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    bzip2::Compression::new(block_size),
                );
                encoder
                    .write_all(data)
                    .map_err(|e| codec_error("bzip2", "encode", e))?;
                encoder
                    .finish()
                    .map_err(|e| codec_error("bzip2", "encode", e))
            }
            Compression::Xz { preset } => {
                let mut encoder =
                    xz2::write::XzEncoder::new(Vec::with_capacity(data.len() / 2), preset);
                encoder
                    .write_all(data)
                    .map_err(|e| codec_error("xz", "encode", e))?;
                encoder.finish().map_err(|e| codec_error("xz", "encode", e))
            }
            Compression::Lz4 { block_size } => {
                let info = FrameInfo::new().block_size(lz4_frame_block_size(block_size));
                let mut encoder =
                    FrameEncoder::with_frame_info(info, Vec::with_capacity(data.len() / 2));
                encoder
                    .write_all(data)
                    .map_err(|e| codec_error("lz4", "encode", e))?;
                encoder.finish().map_err(|e| codec_error("lz4", "encode", e))
            }
            Compression::Blosc { level } => blosc_compress(data, level, element_size),
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::new();
        match self {
            Compression::Raw => return Ok(data.to_vec()),
            Compression::Gzip { .. } => {
                GzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| codec_error("gzip", "decode", e))?;
            }
            Compression::Bzip2 { .. } => {
                bzip2::read::BzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| codec_error("bzip2", "decode", e))?;
            }
            Compression::Xz { .. } => {
                xz2::read::XzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| codec_error("xz", "decode", e))?;
            }
            Compression::Lz4 { .. } => {
                FrameDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| codec_error("lz4", "decode", e))?;
            }
            Compression::Blosc { .. } => return blosc_decompress(data),
        }
        Ok(out)
    }
}

/// Smallest LZ4 frame block size holding `block_size` bytes.
fn lz4_frame_block_size(block_size: u32) -> BlockSize {
    match block_size {
        0..=65_536 => BlockSize::Max64KB,
        65_537..=262_144 => BlockSize::Max256KB,
        262_145..=1_048_576 => BlockSize::Max1MB,
        _ => BlockSize::Max4MB,
    }
}

// =============================================================================
// Blosc
// =============================================================================

fn blosc_compress(data: &[u8], level: u32, element_size: usize) -> Result<Vec<u8>, StoreError> {
    let mut out = vec![0u8; data.len() + blosc_src::BLOSC_MAX_OVERHEAD as usize];
    // SAFETY: both buffers are valid for the lengths passed and do not overlap
    let written = unsafe {
        blosc_src::blosc_compress_ctx(
            level as c_int,
            BLOSC_BYTE_SHUFFLE,
            element_size.max(1),
            data.len(),
            data.as_ptr().cast(),
            out.as_mut_ptr().cast(),
            out.len(),
            BLOSC_COMPRESSOR.as_ptr().cast::<c_char>(),
            0,
            1,
        )
    };
    if written <= 0 {
        return Err(codec_error(
            "blosc",
            "encode",
            format!("blosc_compress_ctx returned {}", written),
        ));
    }
    out.truncate(written as usize);
    Ok(out)
}

fn blosc_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoded_len = 0usize;
    // SAFETY: the header check reads at most `data.len()` bytes
    let valid = unsafe {
        blosc_src::blosc_cbuffer_validate(data.as_ptr().cast(), data.len(), &mut decoded_len)
    };
    if valid != 0 {
        return Err(codec_error("blosc", "decode", "invalid blosc header"));
    }

    let mut out = vec![0u8; decoded_len];
    // SAFETY: `out` holds exactly the decoded length announced by the header
    let read = unsafe {
        blosc_src::blosc_decompress_ctx(
            data.as_ptr().cast(),
            out.as_mut_ptr().cast(),
            out.len(),
            1,
        )
    };
    if read < 0 || read as usize != decoded_len {
        return Err(codec_error(
            "blosc",
            "decode",
            format!("blosc_decompress_ctx returned {}", read),
        ));
    }
    Ok(out)
}
