//! Chunk storage layer.
//!
//! The converter writes every resolution level through the [`ChunkStore`]
//! trait and reads prior levels back through the same trait while building
//! the next one.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Tile tasks                   │
//! └──────────────┬───────────────▲──────────┘
//!                │ write_chunk   │ read_chunk
//!                ▼               │
//! ┌─────────────────────────────────────────┐
//! │          ChunkStore Trait               │
//! └────────────────────┬────────────────────┘
//!                      │
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//! ┌─────────────────┐    ┌─────────────────────┐
//! │ FilesystemStore │    │ FilesystemStore     │
//! │ (N5 layout)     │    │ (Zarr v2 layout)    │
//! └─────────────────┘    └─────────────────────┘
//! ```

mod codec;
mod filesystem;
mod store;

pub use codec::{
    Compression, BLOSC_LEVELS, BZIP2_BLOCK_SIZES, DEFAULT_GZIP_LEVEL, GZIP_LEVELS,
    LZ4_BLOCK_SIZES, MAX_GZIP_LEVEL, XZ_PRESETS,
};
pub use filesystem::{ContainerKind, FilesystemStore};
pub use store::{ChunkStore, DataType, DatasetAttributes, GridPosition, DIMENSIONS};
