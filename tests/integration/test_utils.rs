//! Test utilities for integration tests.
//!
//! This module provides a deterministic synthetic image source and a
//! recording, failure-injecting in-memory chunk store.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use wsi_pyramid::error::{SourceError, StoreError};
use wsi_pyramid::io::{ChunkStore, DataType, DatasetAttributes, GridPosition};
use wsi_pyramid::slide::{ImageReader, ImageSource, MetadataDocument, PixelType, Region};

// =============================================================================
// Synthetic Image Source
// =============================================================================

/// Shape and sample type of one synthetic series.
#[derive(Debug, Clone)]
pub struct SyntheticSeries {
    pub width: u32,
    pub height: u32,
    pub size_z: u32,
    pub size_c: u32,
    pub size_t: u32,
    pub pixel_type: PixelType,
    pub little_endian: bool,
    pub dimension_order: String,
}

impl SyntheticSeries {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            size_z: 1,
            size_c: 1,
            size_t: 1,
            pixel_type: PixelType::Uint8,
            little_endian: false,
            dimension_order: "XYZCT".to_string(),
        }
    }

    pub fn with_channels(mut self, size_c: u32) -> Self {
        self.size_c = size_c;
        self
    }

    pub fn with_pixel_type(mut self, pixel_type: PixelType, little_endian: bool) -> Self {
        self.pixel_type = pixel_type;
        self.little_endian = little_endian;
        self
    }

    pub fn with_dimension_order(mut self, order: &str) -> Self {
        self.dimension_order = order.to_string();
        self
    }

    pub fn image_count(&self) -> u32 {
        self.size_z * self.size_c * self.size_t
    }

    /// Deterministic sample value at `(x, y)` of `plane`.
    pub fn sample(&self, plane: u32, x: u32, y: u32) -> i64 {
        let v = x as i64 * 7 + y as i64 * 13 + plane as i64 * 31;
        match self.pixel_type {
            PixelType::Uint8 => v % 256,
            PixelType::Int8 => v % 256 - 128,
            PixelType::Uint16 => (v * 97) % 65536,
            PixelType::Int16 => (v * 97) % 65536 - 32768,
            _ => v,
        }
    }

    fn encode(&self, value: i64, out: &mut Vec<u8>) {
        match self.pixel_type.bytes_per_sample() {
            1 => out.push(value as u8),
            2 if self.little_endian => out.extend_from_slice(&(value as u16).to_le_bytes()),
            2 => out.extend_from_slice(&(value as u16).to_be_bytes()),
            4 => out.extend_from_slice(&(value as u32).to_be_bytes()),
            _ => out.extend_from_slice(&(value as u64).to_be_bytes()),
        }
    }
}

/// Region request that should fail: `(series, plane, x, y)`.
pub type FailingRegion = (usize, u32, u32, u32);

/// [`ImageSource`] producing a deterministic pattern.
#[derive(Clone)]
pub struct SyntheticSource {
    series: Arc<Vec<SyntheticSeries>>,
    failing_region: Option<FailingRegion>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub regions_read: Arc<AtomicUsize>,
}

impl SyntheticSource {
    pub fn new(series: Vec<SyntheticSeries>) -> Self {
        Self {
            series: Arc::new(series),
            failing_region: None,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            regions_read: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn single(series: SyntheticSeries) -> Self {
        Self::new(vec![series])
    }

    pub fn failing_at(mut self, region: FailingRegion) -> Self {
        self.failing_region = Some(region);
        self
    }

    pub fn series(&self, index: usize) -> &SyntheticSeries {
        &self.series[index]
    }
}

impl ImageSource for SyntheticSource {
    type Reader = SyntheticReader;

    fn open(&self, _path: &Path) -> Result<SyntheticReader, SourceError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(SyntheticReader {
            source: self.clone(),
            series: 0,
        })
    }
}

/// Handle returned by [`SyntheticSource`].
pub struct SyntheticReader {
    source: SyntheticSource,
    series: usize,
}

impl SyntheticReader {
    fn current(&self) -> &SyntheticSeries {
        &self.source.series[self.series]
    }
}

impl ImageReader for SyntheticReader {
    fn format_name(&self) -> &str {
        "synthetic"
    }

    fn series_count(&self) -> usize {
        self.source.series.len()
    }

    fn set_series(&mut self, series: usize) -> Result<(), SourceError> {
        let count = self.series_count();
        if series >= count {
            return Err(SourceError::SeriesOutOfRange { series, count });
        }
        self.series = series;
        Ok(())
    }

    fn series(&self) -> usize {
        self.series
    }

    fn size_x(&self) -> u32 {
        self.current().width
    }

    fn size_y(&self) -> u32 {
        self.current().height
    }

    fn size_z(&self) -> u32 {
        self.current().size_z
    }

    fn size_c(&self) -> u32 {
        self.current().size_c
    }

    fn size_t(&self) -> u32 {
        self.current().size_t
    }

    fn image_count(&self) -> u32 {
        self.current().image_count()
    }

    fn pixel_type(&self) -> PixelType {
        self.current().pixel_type
    }

    fn is_little_endian(&self) -> bool {
        self.current().little_endian
    }

    fn dimension_order(&self) -> &str {
        &self.current().dimension_order
    }

    fn plane_coords(&self, plane: u32) -> Result<[u32; 3], SourceError> {
        let s = self.current();
        let count = s.image_count();
        if plane >= count {
            return Err(SourceError::PlaneOutOfRange { plane, count });
        }
        Ok([plane % s.size_z, (plane / s.size_z) % s.size_c, plane / (s.size_z * s.size_c)])
    }

    fn open_region(&mut self, plane: u32, region: Region) -> Result<Vec<u8>, SourceError> {
        self.source.regions_read.fetch_add(1, Ordering::SeqCst);
        if self.source.failing_region == Some((self.series, plane, region.x, region.y)) {
            return Err(SourceError::Decode(format!(
                "injected failure at plane {} ({}, {})",
                plane, region.x, region.y
            )));
        }

        let s = self.current();
        if !region.fits_within(s.width, s.height) {
            return Err(SourceError::RegionOutOfBounds {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                size_x: s.width,
                size_y: s.height,
            });
        }

        let mut out = Vec::with_capacity(region.area() * s.pixel_type.bytes_per_sample());
        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                s.encode(s.sample(plane, x, y), &mut out);
            }
        }
        Ok(out)
    }

    fn metadata_document(&self) -> Result<MetadataDocument, SourceError> {
        Ok(MetadataDocument {
            extension: "xml".to_string(),
            contents: format!("<Synthetic series=\"{}\"/>", self.series_count()),
        })
    }

    fn close(&mut self) -> Result<(), SourceError> {
        self.source.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Recording Memory Store
// =============================================================================

/// One observed store operation, recorded after it completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Create(String),
    Write(String, GridPosition),
    Read(String, GridPosition),
}

/// In-memory [`ChunkStore`] that records every operation.
#[derive(Default)]
pub struct MemoryStore {
    datasets: Mutex<HashMap<String, DatasetAttributes>>,
    chunks: Mutex<HashMap<(String, GridPosition), Bytes>>,
    root_attributes: Mutex<HashMap<String, serde_json::Value>>,
    events: Mutex<Vec<StoreEvent>>,
    failing_write: Mutex<Option<(String, GridPosition)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the write of one chunk fail.
    pub fn fail_write_at(self, path: &str, position: GridPosition) -> Self {
        *self.failing_write.lock().unwrap() = Some((path.to_string(), position));
        self
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn dataset_paths(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StoreEvent::Create(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn attributes(&self, path: &str) -> Option<DatasetAttributes> {
        self.datasets.lock().unwrap().get(path).copied()
    }

    pub fn root_attribute(&self, key: &str) -> Option<serde_json::Value> {
        self.root_attributes.lock().unwrap().get(key).cloned()
    }

    pub fn chunk_count(&self, path: &str) -> usize {
        self.chunks
            .lock()
            .unwrap()
            .keys()
            .filter(|(p, _)| p == path)
            .count()
    }

    pub fn chunk(&self, path: &str, position: GridPosition) -> Option<Bytes> {
        self.chunks
            .lock()
            .unwrap()
            .get(&(path.to_string(), position))
            .cloned()
    }

    /// Reassemble the full X/Y plane at `zct` grid coordinate of a dataset.
    ///
    /// Returns decoded sample values, row-major.
    pub fn plane(&self, path: &str, zct_slots: [usize; 3], zct: [u64; 3]) -> Vec<i64> {
        let attrs = self.attributes(path).expect("dataset exists");
        let (width, height) = (attrs.shape[0] as usize, attrs.shape[1] as usize);
        let bps = attrs.data_type.bytes_per_sample();
        let grid = attrs.grid_shape();

        let mut out = vec![0i64; width * height];
        for gy in 0..grid[1] {
            for gx in 0..grid[0] {
                let mut pos = [0u64; 5];
                pos[0] = gx;
                pos[1] = gy;
                for (slot, value) in zct_slots.iter().zip(zct.iter()) {
                    pos[*slot] = *value;
                }
                let position = GridPosition(pos);
                let chunk = self.chunk(path, position).expect("chunk written");
                let extent = attrs.chunk_extent(&position);

                let ox = gx as usize * attrs.chunk_shape[0] as usize;
                let oy = gy as usize * attrs.chunk_shape[1] as usize;
                for y in 0..extent[1] as usize {
                    for x in 0..extent[0] as usize {
                        let at = (y * extent[0] as usize + x) * bps;
                        out[(oy + y) * width + ox + x] =
                            decode_sample(&chunk[at..at + bps], attrs.data_type);
                    }
                }
            }
        }
        out
    }

    fn record(&self, event: StoreEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Decode one big-endian sample.
pub fn decode_sample(bytes: &[u8], data_type: DataType) -> i64 {
    match data_type {
        DataType::Uint8 => bytes[0] as i64,
        DataType::Int8 => bytes[0] as i8 as i64,
        DataType::Uint16 => u16::from_be_bytes([bytes[0], bytes[1]]) as i64,
        DataType::Int16 => i16::from_be_bytes([bytes[0], bytes[1]]) as i64,
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn set_root_attribute(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.root_attributes
            .lock()
            .unwrap()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn create_dataset(
        &self,
        path: &str,
        attributes: DatasetAttributes,
    ) -> Result<(), StoreError> {
        self.datasets
            .lock()
            .unwrap()
            .insert(path.to_string(), attributes);
        self.record(StoreEvent::Create(path.to_string()));
        Ok(())
    }

    async fn dataset_attributes(&self, path: &str) -> Result<DatasetAttributes, StoreError> {
        self.attributes(path)
            .ok_or_else(|| StoreError::DatasetNotFound(path.to_string()))
    }

    async fn write_chunk(
        &self,
        path: &str,
        position: GridPosition,
        data: Bytes,
    ) -> Result<(), StoreError> {
        let attrs = self.dataset_attributes(path).await?;
        if !attrs.contains(&position) {
            return Err(StoreError::GridOutOfRange {
                path: path.to_string(),
                position: position.to_string(),
            });
        }
        let expected = attrs.chunk_len(&position);
        if data.len() != expected {
            return Err(StoreError::ChunkSize {
                path: path.to_string(),
                position: position.to_string(),
                expected,
                actual: data.len(),
            });
        }

        let failing = self.failing_write.lock().unwrap().clone();
        if failing == Some((path.to_string(), position)) {
            return Err(StoreError::Io {
                path: path.into(),
                message: format!("injected write failure at {}", position),
            });
        }

        let previous = self
            .chunks
            .lock()
            .unwrap()
            .insert((path.to_string(), position), data);
        assert!(previous.is_none(), "chunk {} of {} written twice", position, path);
        self.record(StoreEvent::Write(path.to_string(), position));
        Ok(())
    }

    async fn read_chunk(&self, path: &str, position: GridPosition) -> Result<Bytes, StoreError> {
        let chunk = self.chunk(path, position).ok_or_else(|| StoreError::Io {
            path: path.into(),
            message: format!("chunk {} not written", position),
        })?;
        self.record(StoreEvent::Read(path.to_string(), position));
        Ok(chunk)
    }
}
