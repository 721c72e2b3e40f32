//! Tile tasks and level enumeration.

use crate::pyramid::LevelGeometry;
use crate::slide::Region;

/// One unit of pyramid work: produce exactly one chunk of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileTask {
    pub series: usize,
    pub resolution: u32,
    pub plane: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileTask {
    /// Pixel region of this tile within its level.
    pub fn region(&self) -> Region {
        Region::new(self.x, self.y, self.width, self.height)
    }
}

/// Lazy iterator over every tile task of a level.
///
/// Rows of tiles are visited top to bottom, tiles left to right, and every
/// plane of a tile position before moving on. Edge tiles are clipped to the
/// level extent.
#[derive(Debug, Clone)]
pub struct TileTasks {
    level: LevelGeometry,
    x: u32,
    y: u32,
    plane: u32,
}

impl TileTasks {
    pub fn new(level: LevelGeometry) -> Self {
        Self {
            level,
            x: 0,
            y: 0,
            plane: 0,
        }
    }
}

impl Iterator for TileTasks {
    type Item = TileTask;

    fn next(&mut self) -> Option<TileTask> {
        let level = &self.level;
        if level.planes == 0 || level.tile_width == 0 || level.tile_height == 0 {
            return None;
        }
        if self.y >= level.height || self.x >= level.width {
            return None;
        }

        let task = TileTask {
            series: level.series,
            resolution: level.resolution,
            plane: self.plane,
            x: self.x,
            y: self.y,
            width: level.tile_width.min(level.width - self.x),
            height: level.tile_height.min(level.height - self.y),
        };

        self.plane += 1;
        if self.plane == level.planes {
            self.plane = 0;
            self.x = self.x.saturating_add(level.tile_width);
            if self.x >= level.width {
                self.x = 0;
                self.y = self.y.saturating_add(level.tile_height);
                if self.y >= level.height {
                    // Park past the end so the iterator stays exhausted
                    self.x = level.width;
                }
            }
        }
        Some(task)
    }
}

impl LevelGeometry {
    /// Every tile task of this level.
    pub fn tasks(&self) -> TileTasks {
        TileTasks::new(*self)
    }
}
