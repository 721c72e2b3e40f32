//! Filesystem chunk store with N5 and Zarr v2 container layouts.
//!
//! Both layouts keep one directory per dataset under the store root:
//!
//! ```text
//! <root>/
//! ├── attributes.json          (N5)   or  .zgroup + .zattrs  (Zarr)
//! └── <series>/<resolution>/
//!     ├── attributes.json      (N5)   or  .zarray            (Zarr)
//!     └── chunks               g0/g1/g2/g3/g4 (N5)  or  g4.g3.g2.g1.g0 (Zarr)
//! ```
//!
//! N5 chunks carry a big-endian header (mode, dimension count, extents)
//! followed by the compressed samples and are stored at their clipped
//! extent. Zarr chunks are always full-sized: edge chunks are zero-padded on
//! write and cropped again on read, so callers of [`ChunkStore`] only ever
//! see clipped extents.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;

use super::codec::{
    Compression, BLOSC_COMPRESSOR_NAME, DEFAULT_BZIP2_BLOCK_SIZE, DEFAULT_LZ4_BLOCK_SIZE,
    DEFAULT_XZ_PRESET,
};
use super::store::{ChunkStore, DataType, DatasetAttributes, GridPosition, DIMENSIONS};

/// Number of dataset attribute sets kept in memory.
const DEFAULT_ATTRIBUTE_CACHE_CAPACITY: usize = 64;

const N5_VERSION: &str = "2.5.1";
const N5_ATTRIBUTES: &str = "attributes.json";

/// N5 block mode for a default (non-varlength) block.
const N5_MODE_DEFAULT: u16 = 0;

const ZARR_FORMAT: u32 = 2;
const ZARR_GROUP: &str = ".zgroup";
const ZARR_ATTRIBUTES: &str = ".zattrs";
const ZARR_ARRAY: &str = ".zarray";

// =============================================================================
// Container Kind
// =============================================================================

/// On-disk layout used by a [`FilesystemStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    N5,
    Zarr,
}

impl ContainerKind {
    /// Pyramid directory name used when none is configured.
    pub fn default_pyramid_name(&self) -> &'static str {
        match self {
            ContainerKind::N5 => "data.n5",
            ContainerKind::Zarr => "data.zarr",
        }
    }
}

// =============================================================================
// Serialized Metadata
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct N5DatasetMetadata {
    dimensions: Vec<u64>,
    block_size: Vec<u32>,
    data_type: DataType,
    compression: N5Compression,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum N5Compression {
    Raw,
    Gzip {
        #[serde(default = "n5_default_level")]
        level: i32,
    },
    Bzip2 {
        #[serde(rename = "blockSize", default = "n5_default_bzip2_block_size")]
        block_size: u32,
    },
    Xz {
        #[serde(default = "n5_default_xz_preset")]
        preset: u32,
    },
    Lz4 {
        #[serde(rename = "blockSize", default = "n5_default_lz4_block_size")]
        block_size: u32,
    },
    Blosc {
        cname: String,
        clevel: u32,
        shuffle: i32,
        #[serde(default)]
        blocksize: u32,
        #[serde(default = "n5_default_blosc_threads")]
        nthreads: u32,
    },
}

fn n5_default_level() -> i32 {
    -1
}

fn n5_default_bzip2_block_size() -> u32 {
    DEFAULT_BZIP2_BLOCK_SIZE
}

fn n5_default_xz_preset() -> u32 {
    DEFAULT_XZ_PRESET
}

fn n5_default_lz4_block_size() -> u32 {
    DEFAULT_LZ4_BLOCK_SIZE
}

fn n5_default_blosc_threads() -> u32 {
    1
}

impl From<Compression> for N5Compression {
    fn from(compression: Compression) -> Self {
        match compression {
            Compression::Raw => N5Compression::Raw,
            Compression::Gzip { level } => N5Compression::Gzip {
                level: level as i32,
            },
            Compression::Bzip2 { block_size } => N5Compression::Bzip2 { block_size },
            Compression::Xz { preset } => N5Compression::Xz { preset },
            Compression::Lz4 { block_size } => N5Compression::Lz4 { block_size },
            Compression::Blosc { level } => N5Compression::Blosc {
                cname: BLOSC_COMPRESSOR_NAME.to_string(),
                clevel: level,
                shuffle: 1,
                blocksize: 0,
                nthreads: 1,
            },
        }
    }
}

impl From<N5Compression> for Compression {
    fn from(compression: N5Compression) -> Self {
        match compression {
            N5Compression::Raw => Compression::Raw,
            N5Compression::Gzip { level } => Compression::gzip(u32::try_from(level).ok()),
            N5Compression::Bzip2 { block_size } => Compression::bzip2(Some(block_size)),
            N5Compression::Xz { preset } => Compression::xz(Some(preset)),
            N5Compression::Lz4 { block_size } => Compression::lz4(Some(block_size)),
            N5Compression::Blosc { clevel, .. } => Compression::blosc(Some(clevel)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ZarrArrayMetadata {
    zarr_format: u32,
    shape: Vec<u64>,
    chunks: Vec<u32>,
    dtype: String,
    compressor: Option<ZarrCompressor>,
    fill_value: Value,
    order: String,
    filters: Option<Vec<Value>>,
    #[serde(default = "zarr_default_separator")]
    dimension_separator: String,
}

/// `compressor` entry of a `.zarray`, keyed by its numcodecs `id`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "lowercase")]
enum ZarrCompressor {
    Gzip {
        #[serde(default)]
        level: Option<u32>,
    },
    Bz2 {
        #[serde(default)]
        level: Option<u32>,
    },
    Lzma {
        #[serde(default)]
        format: Option<u32>,
        #[serde(default)]
        check: Option<i32>,
        #[serde(default)]
        preset: Option<u32>,
        #[serde(default)]
        filters: Option<Value>,
    },
    Lz4 {
        #[serde(rename = "blockSize", default)]
        block_size: Option<u32>,
    },
    Blosc {
        cname: String,
        clevel: u32,
        shuffle: i32,
        #[serde(default)]
        blocksize: u32,
    },
}

/// lzma container format for `.xz` streams.
const LZMA_FORMAT_XZ: u32 = 1;

impl ZarrCompressor {
    fn from_compression(compression: Compression) -> Option<Self> {
        match compression {
            Compression::Raw => None,
            Compression::Gzip { level } => Some(ZarrCompressor::Gzip { level: Some(level) }),
            Compression::Bzip2 { block_size } => Some(ZarrCompressor::Bz2 {
                level: Some(block_size),
            }),
            Compression::Xz { preset } => Some(ZarrCompressor::Lzma {
                format: Some(LZMA_FORMAT_XZ),
                check: Some(-1),
                preset: Some(preset),
                filters: None,
            }),
            Compression::Lz4 { block_size } => Some(ZarrCompressor::Lz4 {
                block_size: Some(block_size),
            }),
            Compression::Blosc { level } => Some(ZarrCompressor::Blosc {
                cname: BLOSC_COMPRESSOR_NAME.to_string(),
                clevel: level,
                shuffle: 1,
                blocksize: 0,
            }),
        }
    }

    fn into_compression(self) -> Result<Compression, String> {
        Ok(match self {
            ZarrCompressor::Gzip { level } => Compression::gzip(level),
            ZarrCompressor::Bz2 { level } => Compression::bzip2(level),
            ZarrCompressor::Lzma { format, preset, .. } => {
                if let Some(format) = format.filter(|&f| f != LZMA_FORMAT_XZ) {
                    return Err(format!("unsupported lzma format {}", format));
                }
                Compression::xz(preset)
            }
            ZarrCompressor::Lz4 { block_size } => Compression::lz4(block_size),
            ZarrCompressor::Blosc { clevel, .. } => Compression::blosc(Some(clevel)),
        })
    }
}

fn zarr_default_separator() -> String {
    ".".to_string()
}

fn to_array<T: Copy + Default, const N: usize>(
    values: &[T],
    path: &Path,
    field: &str,
) -> Result<[T; N], StoreError> {
    if values.len() != N {
        return Err(StoreError::Attributes {
            path: path.to_path_buf(),
            message: format!("{} has {} entries, expected {}", field, values.len(), N),
        });
    }
    let mut out = [T::default(); N];
    out.copy_from_slice(values);
    Ok(out)
}

fn reversed<T: Copy>(values: &[T]) -> Vec<T> {
    values.iter().rev().copied().collect()
}

// =============================================================================
// Chunk Encoding Helpers
// =============================================================================

fn encode_n5_block(extent: &[u32; DIMENSIONS], payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + 4 * DIMENSIONS + payload.len());
    buf.put_u16(N5_MODE_DEFAULT);
    buf.put_u16(DIMENSIONS as u16);
    for &e in extent {
        buf.put_u32(e);
    }
    buf.extend_from_slice(payload);
    buf.freeze()
}

fn decode_n5_block(raw: &[u8]) -> Result<([u32; DIMENSIONS], &[u8]), String> {
    let header_len = 4 + 4 * DIMENSIONS;
    if raw.len() < header_len {
        return Err(format!("block of {} bytes is shorter than its header", raw.len()));
    }

    let mut cursor = raw;
    let mode = cursor.get_u16();
    if mode != N5_MODE_DEFAULT {
        return Err(format!("unsupported block mode {}", mode));
    }
    let ndim = cursor.get_u16() as usize;
    if ndim != DIMENSIONS {
        return Err(format!("block has {} dimensions, expected {}", ndim, DIMENSIONS));
    }

    let mut extent = [0u32; DIMENSIONS];
    for slot in extent.iter_mut() {
        *slot = cursor.get_u32();
    }
    Ok((extent, &raw[header_len..]))
}

/// Pairs of (clipped row index, full row index) for every X row of a chunk.
fn row_pairs(extent: &[u32; DIMENSIONS], full: &[u32; DIMENSIONS]) -> Vec<(usize, usize)> {
    let e: Vec<usize> = extent.iter().map(|&v| v as usize).collect();
    let f: Vec<usize> = full.iter().map(|&v| v as usize).collect();

    let mut pairs = Vec::with_capacity(e[1] * e[2] * e[3] * e[4]);
    for a4 in 0..e[4] {
        for a3 in 0..e[3] {
            for a2 in 0..e[2] {
                for a1 in 0..e[1] {
                    let clipped = a1 + e[1] * (a2 + e[2] * (a3 + e[3] * a4));
                    let padded = a1 + f[1] * (a2 + f[2] * (a3 + f[3] * a4));
                    pairs.push((clipped, padded));
                }
            }
        }
    }
    pairs
}

fn pad_chunk(
    data: &[u8],
    extent: &[u32; DIMENSIONS],
    full: &[u32; DIMENSIONS],
    bps: usize,
) -> Vec<u8> {
    if extent == full {
        return data.to_vec();
    }
    let full_len = full.iter().map(|&v| v as usize).product::<usize>() * bps;
    let row = extent[0] as usize * bps;
    let full_row = full[0] as usize * bps;

    let mut out = vec![0u8; full_len];
    for (clipped, padded) in row_pairs(extent, full) {
        out[padded * full_row..padded * full_row + row]
            .copy_from_slice(&data[clipped * row..clipped * row + row]);
    }
    out
}

fn crop_chunk(
    data: &[u8],
    extent: &[u32; DIMENSIONS],
    full: &[u32; DIMENSIONS],
    bps: usize,
) -> Vec<u8> {
    if extent == full {
        return data.to_vec();
    }
    let len = extent.iter().map(|&v| v as usize).product::<usize>() * bps;
    let row = extent[0] as usize * bps;
    let full_row = full[0] as usize * bps;

    let mut out = vec![0u8; len];
    for (clipped, padded) in row_pairs(extent, full) {
        out[clipped * row..clipped * row + row]
            .copy_from_slice(&data[padded * full_row..padded * full_row + row]);
    }
    out
}

// =============================================================================
// Filesystem Store
// =============================================================================

/// [`ChunkStore`] writing plain files under a root directory.
pub struct FilesystemStore {
    root: PathBuf,
    kind: ContainerKind,

    /// Parsed dataset attributes, so tile tasks do not re-read metadata files
    attributes: Mutex<LruCache<String, DatasetAttributes>>,
}

impl FilesystemStore {
    /// Create a store rooted at `root`. Nothing is written until first use.
    pub fn new(root: impl Into<PathBuf>, kind: ContainerKind) -> Self {
        Self {
            root: root.into(),
            kind,
            attributes: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_ATTRIBUTE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    fn dataset_dir(&self, path: &str) -> PathBuf {
        let mut dir = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            dir.push(part);
        }
        dir
    }

    fn chunk_file(&self, path: &str, position: &GridPosition) -> PathBuf {
        let mut file = self.dataset_dir(path);
        match self.kind {
            ContainerKind::N5 => {
                for p in position.as_slice() {
                    file.push(p.to_string());
                }
            }
            ContainerKind::Zarr => {
                let key: Vec<String> = position.as_slice().iter().rev().map(u64::to_string).collect();
                file.push(key.join("."));
            }
        }
        file
    }

    async fn read_json_object(&self, file: &Path) -> Result<Map<String, Value>, StoreError> {
        match tokio::fs::read(file).await {
            Ok(raw) => match serde_json::from_slice::<Value>(&raw) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(StoreError::Attributes {
                    path: file.to_path_buf(),
                    message: "expected a JSON object".to_string(),
                }),
                Err(e) => Err(StoreError::Attributes {
                    path: file.to_path_buf(),
                    message: e.to_string(),
                }),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(StoreError::io(file, e)),
        }
    }

    async fn write_json(&self, file: &Path, value: &impl Serialize) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Attributes {
            path: file.to_path_buf(),
            message: e.to_string(),
        })?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        tokio::fs::write(file, raw)
            .await
            .map_err(|e| StoreError::io(file, e))
    }

    /// Make sure the root group exists.
    async fn ensure_root_group(&self) -> Result<(), StoreError> {
        match self.kind {
            ContainerKind::N5 => {
                let file = self.root.join(N5_ATTRIBUTES);
                let mut attrs = self.read_json_object(&file).await?;
                if !attrs.contains_key("n5") {
                    attrs.insert("n5".to_string(), json!(N5_VERSION));
                    self.write_json(&file, &attrs).await?;
                }
                Ok(())
            }
            ContainerKind::Zarr => self.ensure_zarr_group(&self.root).await,
        }
    }

    async fn ensure_zarr_group(&self, dir: &Path) -> Result<(), StoreError> {
        let file = dir.join(ZARR_GROUP);
        if tokio::fs::try_exists(&file)
            .await
            .map_err(|e| StoreError::io(&file, e))?
        {
            return Ok(());
        }
        self.write_json(&file, &json!({ "zarr_format": ZARR_FORMAT }))
            .await
    }

    async fn cached_attributes(&self, path: &str) -> Result<DatasetAttributes, StoreError> {
        if let Some(attrs) = self.attributes.lock().await.get(path).copied() {
            return Ok(attrs);
        }
        let attrs = self.load_attributes(path).await?;
        self.attributes.lock().await.put(path.to_string(), attrs);
        Ok(attrs)
    }

    async fn load_attributes(&self, path: &str) -> Result<DatasetAttributes, StoreError> {
        let dir = self.dataset_dir(path);
        let file = match self.kind {
            ContainerKind::N5 => dir.join(N5_ATTRIBUTES),
            ContainerKind::Zarr => dir.join(ZARR_ARRAY),
        };

        let raw = match tokio::fs::read(&file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::DatasetNotFound(path.to_string()))
            }
            Err(e) => return Err(StoreError::io(&file, e)),
        };
        let invalid = |message: String| StoreError::Attributes {
            path: file.clone(),
            message,
        };

        match self.kind {
            ContainerKind::N5 => {
                let meta: N5DatasetMetadata =
                    serde_json::from_slice(&raw).map_err(|e| invalid(e.to_string()))?;
                Ok(DatasetAttributes {
                    shape: to_array(&meta.dimensions, &file, "dimensions")?,
                    chunk_shape: to_array(&meta.block_size, &file, "blockSize")?,
                    data_type: meta.data_type,
                    compression: meta.compression.into(),
                })
            }
            ContainerKind::Zarr => {
                let meta: ZarrArrayMetadata =
                    serde_json::from_slice(&raw).map_err(|e| invalid(e.to_string()))?;
                let data_type = DataType::from_zarr_dtype(&meta.dtype)
                    .ok_or_else(|| invalid(format!("unsupported dtype {}", meta.dtype)))?;
                let compression = match meta.compressor {
                    None => Compression::Raw,
                    Some(c) => c.into_compression().map_err(invalid)?,
                };
                Ok(DatasetAttributes {
                    shape: to_array(&reversed(&meta.shape), &file, "shape")?,
                    chunk_shape: to_array(&reversed(&meta.chunks), &file, "chunks")?,
                    data_type,
                    compression,
                })
            }
        }
    }

    fn check_position(
        &self,
        path: &str,
        attrs: &DatasetAttributes,
        position: &GridPosition,
    ) -> Result<(), StoreError> {
        if attrs.contains(position) {
            Ok(())
        } else {
            Err(StoreError::GridOutOfRange {
                path: path.to_string(),
                position: position.to_string(),
            })
        }
    }
}

#[async_trait]
impl ChunkStore for FilesystemStore {
    async fn set_root_attribute(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.ensure_root_group().await?;
        let file = match self.kind {
            ContainerKind::N5 => self.root.join(N5_ATTRIBUTES),
            ContainerKind::Zarr => self.root.join(ZARR_ATTRIBUTES),
        };
        let mut attrs = self.read_json_object(&file).await?;
        attrs.insert(key.to_string(), value);
        self.write_json(&file, &attrs).await
    }

    async fn create_dataset(
        &self,
        path: &str,
        attributes: DatasetAttributes,
    ) -> Result<(), StoreError> {
        self.ensure_root_group().await?;
        let dir = self.dataset_dir(path);

        match self.kind {
            ContainerKind::N5 => {
                let meta = N5DatasetMetadata {
                    dimensions: attributes.shape.to_vec(),
                    block_size: attributes.chunk_shape.to_vec(),
                    data_type: attributes.data_type,
                    compression: attributes.compression.into(),
                };
                self.write_json(&dir.join(N5_ATTRIBUTES), &meta).await?;
            }
            ContainerKind::Zarr => {
                // Every directory between the root and the array is a group
                let mut group = self.root.clone();
                let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
                for part in parts.iter().take(parts.len().saturating_sub(1)) {
                    group.push(part);
                    self.ensure_zarr_group(&group).await?;
                }

                let compressor = ZarrCompressor::from_compression(attributes.compression);
                let meta = ZarrArrayMetadata {
                    zarr_format: ZARR_FORMAT,
                    shape: reversed(&attributes.shape),
                    chunks: reversed(&attributes.chunk_shape),
                    dtype: attributes.data_type.zarr_dtype().to_string(),
                    compressor,
                    fill_value: json!(0),
                    order: "C".to_string(),
                    filters: None,
                    dimension_separator: zarr_default_separator(),
                };
                self.write_json(&dir.join(ZARR_ARRAY), &meta).await?;
            }
        }

        self.attributes
            .lock()
            .await
            .put(path.to_string(), attributes);
        debug!(
            "Created dataset {} shape {:?} chunks {:?}",
            path, attributes.shape, attributes.chunk_shape
        );
        Ok(())
    }

    async fn dataset_attributes(&self, path: &str) -> Result<DatasetAttributes, StoreError> {
        self.cached_attributes(path).await
    }

    async fn write_chunk(
        &self,
        path: &str,
        position: GridPosition,
        data: Bytes,
    ) -> Result<(), StoreError> {
        let attrs = self.cached_attributes(path).await?;
        self.check_position(path, &attrs, &position)?;

        let expected = attrs.chunk_len(&position);
        if data.len() != expected {
            return Err(StoreError::ChunkSize {
                path: path.to_string(),
                position: position.to_string(),
                expected,
                actual: data.len(),
            });
        }

        let extent = attrs.chunk_extent(&position);
        let bps = attrs.data_type.bytes_per_sample();
        let encoded = match self.kind {
            ContainerKind::N5 => {
                let payload = attrs.compression.compress(&data, bps)?;
                encode_n5_block(&extent, &payload)
            }
            ContainerKind::Zarr => {
                let padded = pad_chunk(&data, &extent, &attrs.chunk_shape, bps);
                Bytes::from(attrs.compression.compress(&padded, bps)?)
            }
        };

        let file = self.chunk_file(path, &position);
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        tokio::fs::write(&file, &encoded)
            .await
            .map_err(|e| StoreError::io(&file, e))
    }

    async fn read_chunk(&self, path: &str, position: GridPosition) -> Result<Bytes, StoreError> {
        let attrs = self.cached_attributes(path).await?;
        self.check_position(path, &attrs, &position)?;

        let file = self.chunk_file(path, &position);
        let raw = tokio::fs::read(&file)
            .await
            .map_err(|e| StoreError::io(&file, e))?;

        let extent = attrs.chunk_extent(&position);
        let bps = attrs.data_type.bytes_per_sample();
        let data = match self.kind {
            ContainerKind::N5 => {
                let (stored_extent, payload) =
                    decode_n5_block(&raw).map_err(|message| StoreError::Attributes {
                        path: file.clone(),
                        message,
                    })?;
                if stored_extent != extent {
                    return Err(StoreError::Attributes {
                        path: file.clone(),
                        message: format!(
                            "block extent {:?} does not match expected {:?}",
                            stored_extent, extent
                        ),
                    });
                }
                attrs.compression.decompress(payload)?
            }
            ContainerKind::Zarr => {
                let full = attrs.compression.decompress(&raw)?;
                let full_len = attrs
                    .chunk_shape
                    .iter()
                    .map(|&v| v as usize)
                    .product::<usize>()
                    * bps;
                if full.len() != full_len {
                    return Err(StoreError::ChunkSize {
                        path: path.to_string(),
                        position: position.to_string(),
                        expected: full_len,
                        actual: full.len(),
                    });
                }
                crop_chunk(&full, &extent, &attrs.chunk_shape, bps)
            }
        };

        let expected = attrs.chunk_len(&position);
        if data.len() != expected {
            return Err(StoreError::ChunkSize {
                path: path.to_string(),
                position: position.to_string(),
                expected,
                actual: data.len(),
            });
        }
        Ok(Bytes::from(data))
    }
}

// =============================================================================
// Tests
// =============================================================================
