//! Dimension mapping between logical axes and storage slots.
//!
//! Every dataset has five slots. X and Y always occupy slots 0 and 1; Z, C
//! and T are placed at the index of their letter in the axis-order string.
//! The same mapping builds dataset shapes, chunk shapes and per-tile grid
//! positions, so the three always agree.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::io::DIMENSIONS;

/// Axis order used when neither the source nor the caller declares one.
pub const DEFAULT_AXIS_ORDER: &str = "XYZCT";

/// A validated axis-order string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AxisOrder {
    order: String,

    /// Slot of Z, C and T
    slots: [usize; 3],
}

impl AxisOrder {
    /// Parse and validate an order string such as `XYCZT`.
    ///
    /// The string is case-insensitive, must name each of X, Y, Z, C, T
    /// exactly once, and must start with `XY`.
    pub fn parse(order: &str) -> Result<Self, ConfigError> {
        let upper = order.trim().to_ascii_uppercase();
        let invalid = |reason: &str| ConfigError::InvalidAxisOrder {
            order: order.to_string(),
            reason: reason.to_string(),
        };

        if upper.chars().count() != DIMENSIONS {
            return Err(invalid("expected exactly five axes"));
        }
        for axis in ['X', 'Y', 'Z', 'C', 'T'] {
            match upper.chars().filter(|&c| c == axis).count() {
                0 => return Err(invalid(&format!("missing axis {}", axis))),
                1 => {}
                _ => return Err(invalid(&format!("axis {} appears more than once", axis))),
            }
        }
        if !upper.starts_with("XY") {
            return Err(invalid("X and Y must be the first two axes"));
        }

        let slot = |axis: char| upper.find(axis).unwrap_or_default();
        let slots = [slot('Z'), slot('C'), slot('T')];
        Ok(Self {
            order: upper,
            slots,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.order
    }

    /// Storage slots of Z, C and T, in that order.
    pub fn zct_slots(&self) -> [usize; 3] {
        self.slots
    }

    /// Place an X, Y and (z, c, t) triple into a 5-slot vector.
    pub fn place<T: Copy + Default>(&self, x: T, y: T, zct: [T; 3]) -> [T; DIMENSIONS] {
        let mut out = [T::default(); DIMENSIONS];
        out[0] = x;
        out[1] = y;
        for (value, &slot) in zct.iter().zip(self.slots.iter()) {
            out[slot] = *value;
        }
        out
    }

    /// Dataset shape for the given sizes.
    pub fn dimensions(
        &self,
        size_x: u64,
        size_y: u64,
        size_z: u64,
        size_c: u64,
        size_t: u64,
    ) -> [u64; DIMENSIONS] {
        self.place(size_x, size_y, [size_z, size_c, size_t])
    }
}

impl Default for AxisOrder {
    fn default() -> Self {
        Self {
            order: DEFAULT_AXIS_ORDER.to_string(),
            slots: [2, 3, 4],
        }
    }
}

impl FromStr for AxisOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AxisOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.order)
    }
}
