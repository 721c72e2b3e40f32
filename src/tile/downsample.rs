//! Downsampling strategies.
//!
//! A [`Downsampler`] shrinks one assembled source buffer by an integer
//! factor. Samples are big-endian on both sides.

use crate::io::DataType;

/// Strategy used to build level `r` from level `r - 1`.
pub trait Downsampler: Send + Sync {
    /// Downsample a `width * height` buffer by `factor`.
    ///
    /// Returns `ceil(width / factor) * ceil(height / factor)` samples.
    fn downsample(
        &self,
        source: &[u8],
        width: u32,
        height: u32,
        data_type: DataType,
        factor: u32,
    ) -> Vec<u8>;
}

/// Mean of every `factor x factor` block, rounded toward negative infinity.
///
/// Blocks cut by the right or bottom edge average only the samples they
/// contain.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxFilter;

impl Downsampler for BoxFilter {
    fn downsample(
        &self,
        source: &[u8],
        width: u32,
        height: u32,
        data_type: DataType,
        factor: u32,
    ) -> Vec<u8> {
        let factor = factor.max(1) as usize;
        let (width, height) = (width as usize, height as usize);
        let out_width = width.div_ceil(factor);
        let out_height = height.div_ceil(factor);
        let bps = data_type.bytes_per_sample();

        let mut out = Vec::with_capacity(out_width * out_height * bps);
        for oy in 0..out_height {
            let rows = oy * factor..((oy + 1) * factor).min(height);
            for ox in 0..out_width {
                let cols = ox * factor..((ox + 1) * factor).min(width);

                let mut sum = 0i64;
                let mut count = 0i64;
                for y in rows.clone() {
                    for x in cols.clone() {
                        sum += read_sample(source, (y * width + x) * bps, data_type);
                        count += 1;
                    }
                }
                write_sample(&mut out, sum.div_euclid(count.max(1)), data_type);
            }
        }
        out
    }
}

fn read_sample(buf: &[u8], offset: usize, data_type: DataType) -> i64 {
    match data_type {
        DataType::Uint8 => buf[offset] as i64,
        DataType::Int8 => buf[offset] as i8 as i64,
        DataType::Uint16 => u16::from_be_bytes([buf[offset], buf[offset + 1]]) as i64,
        DataType::Int16 => i16::from_be_bytes([buf[offset], buf[offset + 1]]) as i64,
    }
}

fn write_sample(out: &mut Vec<u8>, value: i64, data_type: DataType) {
    match data_type {
        DataType::Uint8 => out.push(value as u8),
        DataType::Int8 => out.push(value as i8 as u8),
        DataType::Uint16 => out.extend_from_slice(&(value as u16).to_be_bytes()),
        DataType::Int16 => out.extend_from_slice(&(value as i16).to_be_bytes()),
    }
}
