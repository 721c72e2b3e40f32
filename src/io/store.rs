//! Chunk store capability.
//!
//! A chunk store holds N-D chunked datasets addressed by a path string and
//! a 5-slot [`GridPosition`]. The converter only needs five operations:
//! create a dataset, read its attributes back, write a chunk, read a chunk,
//! and set a root attribute.
//!
//! Chunk payloads always cover the chunk's *clipped* extent: an edge chunk of
//! a dataset that is not a multiple of the chunk shape carries only the
//! samples that fall inside the dataset. Samples are big-endian.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, StoreError};
use crate::slide::PixelType;

use super::codec::Compression;

/// Number of slots in every shape and grid position.
pub const DIMENSIONS: usize = 5;

// =============================================================================
// Data Type
// =============================================================================

/// Element type of a stored dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int8,
    Uint8,
    Int16,
    Uint16,
}

impl DataType {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
        }
    }

    /// Zarr v2 `dtype` string (big-endian for multi-byte types).
    pub fn zarr_dtype(&self) -> &'static str {
        match self {
            DataType::Int8 => "|i1",
            DataType::Uint8 => "|u1",
            DataType::Int16 => ">i2",
            DataType::Uint16 => ">u2",
        }
    }

    pub fn from_zarr_dtype(dtype: &str) -> Option<Self> {
        match dtype {
            "|i1" => Some(DataType::Int8),
            "|u1" => Some(DataType::Uint8),
            ">i2" => Some(DataType::Int16),
            ">u2" => Some(DataType::Uint16),
            _ => None,
        }
    }
}

impl TryFrom<PixelType> for DataType {
    type Error = ConfigError;

    fn try_from(pixel_type: PixelType) -> Result<Self, Self::Error> {
        match pixel_type {
            PixelType::Int8 => Ok(DataType::Int8),
            PixelType::Uint8 => Ok(DataType::Uint8),
            PixelType::Int16 => Ok(DataType::Int16),
            PixelType::Uint16 => Ok(DataType::Uint16),
            other => Err(ConfigError::UnsupportedPixelType(other)),
        }
    }
}

// =============================================================================
// Grid Position
// =============================================================================

/// Chunk coordinate within a dataset's chunk grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPosition(pub [u64; DIMENSIONS]);

impl GridPosition {
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }
}

impl fmt::Display for GridPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e] = self.0;
        write!(f, "[{}, {}, {}, {}, {}]", a, b, c, d, e)
    }
}

// =============================================================================
// Dataset Attributes
// =============================================================================

/// Shape, chunking, element type and compression of one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetAttributes {
    pub shape: [u64; DIMENSIONS],
    pub chunk_shape: [u32; DIMENSIONS],
    pub data_type: DataType,
    pub compression: Compression,
}

impl DatasetAttributes {
    /// Number of chunks along each axis.
    pub fn grid_shape(&self) -> [u64; DIMENSIONS] {
        let mut grid = [0u64; DIMENSIONS];
        for (i, slot) in grid.iter_mut().enumerate() {
            *slot = self.shape[i].div_ceil(self.chunk_shape[i].max(1) as u64);
        }
        grid
    }

    /// Whether `position` addresses a chunk of this dataset.
    pub fn contains(&self, position: &GridPosition) -> bool {
        let grid = self.grid_shape();
        position.0.iter().zip(grid.iter()).all(|(p, g)| p < g)
    }

    /// Extent of the chunk at `position`, clipped to the dataset shape.
    pub fn chunk_extent(&self, position: &GridPosition) -> [u32; DIMENSIONS] {
        let mut extent = [0u32; DIMENSIONS];
        for (i, slot) in extent.iter_mut().enumerate() {
            let chunk = self.chunk_shape[i] as u64;
            let start = position.0[i] * chunk;
            *slot = chunk.min(self.shape[i].saturating_sub(start)) as u32;
        }
        extent
    }

    /// Byte length of the clipped chunk at `position`.
    pub fn chunk_len(&self, position: &GridPosition) -> usize {
        self.chunk_extent(position)
            .iter()
            .map(|&e| e as usize)
            .product::<usize>()
            * self.data_type.bytes_per_sample()
    }
}

// =============================================================================
// Chunk Store Trait
// =============================================================================

/// Storage engine for chunked datasets.
///
/// Implementations must accept concurrent writes to distinct chunks and
/// concurrent reads of chunks that are no longer being written. The converter
/// never reads and writes the same chunk at the same time.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Set one attribute on the root group.
    async fn set_root_attribute(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Create (or replace) the dataset at `path`.
    async fn create_dataset(
        &self,
        path: &str,
        attributes: DatasetAttributes,
    ) -> Result<(), StoreError>;

    /// Read back the attributes of an existing dataset.
    async fn dataset_attributes(&self, path: &str) -> Result<DatasetAttributes, StoreError>;

    /// Write the chunk at `position`; `data` must cover the clipped extent.
    async fn write_chunk(
        &self,
        path: &str,
        position: GridPosition,
        data: Bytes,
    ) -> Result<(), StoreError>;

    /// Read the chunk at `position`, returning its clipped extent.
    async fn read_chunk(&self, path: &str, position: GridPosition) -> Result<Bytes, StoreError>;
}

// =============================================================================
// Tests
// =============================================================================
