//! Level geometry.
//!
//! Everything the driver needs to know about one series and its resolution
//! levels, captured once from a reader so tile tasks never consult a decoder
//! for geometry.

use crate::error::{ConfigError, ConvertError, SourceError};
use crate::io::{Compression, DataType, DatasetAttributes, GridPosition};
use crate::slide::{ImageReader, PixelType};
use crate::tile::TileTask;

use super::axes::AxisOrder;

/// Largest X/Y extent of the coarsest level when the resolution count is
/// derived automatically.
pub const MIN_SIZE: u32 = 256;

/// Downsampling factor between consecutive levels.
pub const SCALE_FACTOR: u32 = 2;

/// Root attribute recording the layout version.
pub const LAYOUT_ATTRIBUTE: &str = "bioformats2raw.layout";

/// Current layout version.
pub const LAYOUT_VERSION: u32 = 1;

/// Default dataset path format.
pub const DEFAULT_PATH_FORMAT: &str = "{series}/{resolution}";

/// Number of levels needed until both extents are at most `min_size`.
///
/// Always at least 1.
pub fn resolution_count(size_x: u32, size_y: u32, min_size: u32) -> u32 {
    let mut count = 1;
    let (mut width, mut height) = (size_x, size_y);
    while width > min_size || height > min_size {
        count += 1;
        width /= SCALE_FACTOR;
        height /= SCALE_FACTOR;
    }
    count
}

/// Check that a path format names both placeholders.
pub fn validate_path_format(format: &str) -> Result<(), ConfigError> {
    if format.contains("{series}") && format.contains("{resolution}") {
        Ok(())
    } else {
        Err(ConfigError::InvalidPathFormat(format.to_string()))
    }
}

/// Expand a path format for one dataset.
pub fn dataset_path(format: &str, series: usize, resolution: u32) -> String {
    format
        .replace("{series}", &series.to_string())
        .replace("{resolution}", &resolution.to_string())
}

// =============================================================================
// Series Info
// =============================================================================

/// Immutable description of one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesInfo {
    pub index: usize,
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: u32,
    pub size_c: u32,
    pub size_t: u32,
    pub pixel_type: PixelType,
    pub little_endian: bool,
    pub axes: AxisOrder,

    /// `(z, c, t)` of every plane, indexed by plane number
    pub planes: Vec<[u32; 3]>,
}

impl SeriesInfo {
    /// Capture the current series of `reader`.
    ///
    /// `axes` overrides the order declared by the reader.
    pub fn from_reader<R: ImageReader + ?Sized>(
        reader: &R,
        axes: Option<&AxisOrder>,
    ) -> Result<Self, ConvertError> {
        let axes = match axes {
            Some(axes) => axes.clone(),
            None => AxisOrder::parse(reader.dimension_order())?,
        };
        let planes = (0..reader.image_count())
            .map(|plane| reader.plane_coords(plane))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            index: reader.series(),
            size_x: reader.size_x(),
            size_y: reader.size_y(),
            size_z: reader.size_z(),
            size_c: reader.size_c(),
            size_t: reader.size_t(),
            pixel_type: reader.pixel_type(),
            little_endian: reader.is_little_endian(),
            axes,
            planes,
        })
    }

    pub fn image_count(&self) -> u32 {
        self.planes.len() as u32
    }

    pub fn plane_coords(&self, plane: u32) -> Result<[u32; 3], SourceError> {
        self.planes
            .get(plane as usize)
            .copied()
            .ok_or(SourceError::PlaneOutOfRange {
                plane,
                count: self.image_count(),
            })
    }

    pub fn resolution_count(&self, min_size: u32) -> u32 {
        resolution_count(self.size_x, self.size_y, min_size)
    }

    /// Geometry of `resolution` for the configured tile size.
    pub fn level(
        &self,
        resolution: u32,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<LevelGeometry, ConfigError> {
        let width = self.size_x.checked_shr(resolution).unwrap_or(0);
        let height = self.size_y.checked_shr(resolution).unwrap_or(0);
        if width == 0 || height == 0 {
            return Err(ConfigError::EmptyResolution {
                series: self.index,
                resolution,
                width,
                height,
            });
        }

        Ok(LevelGeometry {
            series: self.index,
            resolution,
            width,
            height,
            tile_width,
            tile_height,
            planes: self.image_count(),
        })
    }

    /// Dataset attributes for one level.
    ///
    /// Fails if the pixel type cannot be stored.
    pub fn dataset_attributes(
        &self,
        level: &LevelGeometry,
        compression: Compression,
    ) -> Result<DatasetAttributes, ConfigError> {
        let data_type = DataType::try_from(self.pixel_type)?;
        let shape = self.axes.dimensions(
            level.width as u64,
            level.height as u64,
            self.size_z as u64,
            self.size_c as u64,
            self.size_t as u64,
        );
        let chunk_shape = self
            .axes
            .place(level.chunk_width(), level.chunk_height(), [1, 1, 1]);

        Ok(DatasetAttributes {
            shape,
            chunk_shape,
            data_type,
            compression,
        })
    }

    /// Chunk addressed by `task` within `level`.
    pub fn grid_position(
        &self,
        level: &LevelGeometry,
        task: &TileTask,
    ) -> Result<GridPosition, SourceError> {
        let [z, c, t] = self.plane_coords(task.plane)?;
        Ok(GridPosition(self.axes.place(
            (task.x / level.chunk_width()) as u64,
            (task.y / level.chunk_height()) as u64,
            [z as u64, c as u64, t as u64],
        )))
    }
}

// =============================================================================
// Level Geometry
// =============================================================================

/// X/Y geometry of one resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelGeometry {
    pub series: usize,
    pub resolution: u32,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub planes: u32,
}

impl LevelGeometry {
    /// Chunk width, clipped to the level when the level is narrower than a tile.
    pub fn chunk_width(&self) -> u32 {
        self.tile_width.min(self.width)
    }

    pub fn chunk_height(&self) -> u32 {
        self.tile_height.min(self.height)
    }

    pub fn tiles_x(&self) -> u32 {
        self.width.div_ceil(self.tile_width)
    }

    pub fn tiles_y(&self) -> u32 {
        self.height.div_ceil(self.tile_height)
    }

    /// Number of tile tasks in this level.
    pub fn tile_count(&self) -> u64 {
        self.tiles_x() as u64 * self.tiles_y() as u64 * self.planes as u64
    }
}
