//! End-to-end conversion tests against the in-memory store.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::test_utils::{decode_sample, MemoryStore, StoreEvent, SyntheticSeries, SyntheticSource};

use wsi_pyramid::error::{ConfigError, ConvertError, SourceError, StoreError};
use wsi_pyramid::io::{Compression, DataType, GridPosition};
use wsi_pyramid::pyramid::{
    AxisOrder, ConversionSummary, ConvertOptions, PyramidConverter, LAYOUT_ATTRIBUTE,
};
use wsi_pyramid::slide::PixelType;
use wsi_pyramid::tile::Downsampler;

// =============================================================================
// Helpers
// =============================================================================

fn options(workers: usize, tile: u32) -> ConvertOptions {
    ConvertOptions {
        tile_width: tile,
        tile_height: tile,
        worker_count: workers,
        compression: Compression::Raw,
        ..Default::default()
    }
}

async fn convert(
    source: SyntheticSource,
    store: Arc<MemoryStore>,
    options: ConvertOptions,
) -> Result<ConversionSummary, ConvertError> {
    let output = tempfile::tempdir().unwrap();
    PyramidConverter::new(source, store, options)
        .convert(Path::new("synthetic.img"), output.path())
        .await
}

/// Plane coordinates of a synthetic series, in plane order.
fn planes(series: &SyntheticSeries) -> Vec<[u64; 3]> {
    (0..series.image_count())
        .map(|p| {
            [
                (p % series.size_z) as u64,
                ((p / series.size_z) % series.size_c) as u64,
                (p / (series.size_z * series.size_c)) as u64,
            ]
        })
        .collect()
}

/// Resolution 0 must equal the source pattern.
fn assert_full_resolution(store: &MemoryStore, path: &str, series: &SyntheticSeries, axes: &AxisOrder) {
    for (plane, zct) in planes(series).into_iter().enumerate() {
        let values = store.plane(path, axes.zct_slots(), zct);
        for y in 0..series.height {
            for x in 0..series.width {
                assert_eq!(
                    values[(y * series.width + x) as usize],
                    series.sample(plane as u32, x, y),
                    "{} plane {} at ({}, {})",
                    path,
                    plane,
                    x,
                    y
                );
            }
        }
    }
}

/// Every level must be the 2x2 box average of the level below.
fn assert_cascade(
    store: &MemoryStore,
    series_index: usize,
    resolutions: u32,
    series: &SyntheticSeries,
    axes: &AxisOrder,
) {
    for zct in planes(series) {
        for r in 1..resolutions {
            let prior_path = format!("{}/{}", series_index, r - 1);
            let path = format!("{}/{}", series_index, r);
            let prior_attrs = store.attributes(&prior_path).unwrap();
            let attrs = store.attributes(&path).unwrap();
            let prior_width = prior_attrs.shape[0] as usize;
            let (width, height) = (attrs.shape[0] as usize, attrs.shape[1] as usize);

            assert_eq!(width, prior_width / 2);
            assert_eq!(height, prior_attrs.shape[1] as usize / 2);

            let prior = store.plane(&prior_path, axes.zct_slots(), zct);
            let level = store.plane(&path, axes.zct_slots(), zct);
            for y in 0..height {
                for x in 0..width {
                    let sum = prior[2 * y * prior_width + 2 * x]
                        + prior[2 * y * prior_width + 2 * x + 1]
                        + prior[(2 * y + 1) * prior_width + 2 * x]
                        + prior[(2 * y + 1) * prior_width + 2 * x + 1];
                    assert_eq!(
                        level[y * width + x],
                        sum.div_euclid(4),
                        "{} {:?} at ({}, {})",
                        path,
                        zct,
                        x,
                        y
                    );
                }
            }
        }
    }
}

// =============================================================================
// Cascade
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cascade_matches_box_downsample() {
    let series = SyntheticSeries::new(1000, 700)
        .with_channels(2)
        .with_dimension_order("XYCZT");
    let source = SyntheticSource::single(series.clone());
    let store = Arc::new(MemoryStore::new());

    let summary = convert(source, Arc::clone(&store), options(3, 128))
        .await
        .unwrap();
    assert_eq!(summary.resolutions, vec![3]);
    assert_eq!(summary.format, "synthetic");

    let axes = AxisOrder::parse("XYCZT").unwrap();
    assert_eq!(store.attributes("0/0").unwrap().shape, [1000, 700, 2, 1, 1]);
    assert_full_resolution(&store, "0/0", &series, &axes);
    assert_cascade(&store, 0, 3, &series, &axes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cascade_signed_sixteen_bit() {
    let series = SyntheticSeries::new(530, 300).with_pixel_type(PixelType::Int16, false);
    let source = SyntheticSource::single(series.clone());
    let store = Arc::new(MemoryStore::new());

    let summary = convert(source, Arc::clone(&store), options(2, 100))
        .await
        .unwrap();
    assert_eq!(summary.resolutions, vec![3]);
    assert_eq!(store.attributes("0/2").unwrap().data_type, DataType::Int16);

    let axes = AxisOrder::default();
    assert_full_resolution(&store, "0/0", &series, &axes);
    assert_cascade(&store, 0, 3, &series, &axes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_little_endian_source_is_stored_big_endian() {
    let series = SyntheticSeries::new(300, 200).with_pixel_type(PixelType::Uint16, true);
    let source = SyntheticSource::single(series.clone());
    let store = Arc::new(MemoryStore::new());

    convert(source, Arc::clone(&store), {
        let mut o = options(2, 256);
        o.resolutions = Some(2);
        o
    })
    .await
    .unwrap();

    let chunk = store.chunk("0/0", GridPosition([0, 0, 0, 0, 0])).unwrap();
    let expected = series.sample(0, 1, 0) as u16;
    assert_eq!(&chunk[2..4], &expected.to_be_bytes());
    assert_eq!(decode_sample(&chunk[2..4], DataType::Uint16), expected as i64);

    let axes = AxisOrder::default();
    assert_full_resolution(&store, "0/0", &series, &axes);
    assert_cascade(&store, 0, 2, &series, &axes);
}

// =============================================================================
// Geometry
// =============================================================================

#[tokio::test]
async fn test_level_shapes_and_clipped_chunks() {
    let source = SyntheticSource::single(SyntheticSeries::new(600, 300));
    let store = Arc::new(MemoryStore::new());

    let summary = convert(source, Arc::clone(&store), options(2, 256))
        .await
        .unwrap();
    assert_eq!(summary.resolutions, vec![3]);
    assert_eq!(store.dataset_paths(), vec!["0/0", "0/1", "0/2"]);

    let level0 = store.attributes("0/0").unwrap();
    assert_eq!(level0.shape, [600, 300, 1, 1, 1]);
    assert_eq!(level0.chunk_shape, [256, 256, 1, 1, 1]);

    let level2 = store.attributes("0/2").unwrap();
    assert_eq!(level2.shape, [150, 75, 1, 1, 1]);
    assert_eq!(level2.chunk_shape, [150, 75, 1, 1, 1]);

    // 3x2 + 2x1 + 1x1 tiles
    assert_eq!(store.chunk_count("0/0"), 6);
    assert_eq!(store.chunk_count("0/1"), 2);
    assert_eq!(store.chunk_count("0/2"), 1);
    assert_eq!(summary.tiles_written, 9);
    assert_eq!(store.root_attribute(LAYOUT_ATTRIBUTE), Some(serde_json::json!(1)));
}

#[tokio::test]
async fn test_axis_order_override() {
    let series = SyntheticSeries::new(64, 64).with_channels(3);
    let source = SyntheticSource::single(series);
    let store = Arc::new(MemoryStore::new());

    let mut opts = options(2, 64);
    opts.axis_order = Some(AxisOrder::parse("XYCZT").unwrap());
    convert(source, Arc::clone(&store), opts).await.unwrap();

    assert_eq!(store.attributes("0/0").unwrap().shape, [64, 64, 3, 1, 1]);
    assert!(store.chunk("0/0", GridPosition([0, 0, 2, 0, 0])).is_some());
}

#[tokio::test]
async fn test_multiple_series() {
    let source = SyntheticSource::new(vec![
        SyntheticSeries::new(700, 520),
        SyntheticSeries::new(90, 60).with_pixel_type(PixelType::Uint16, false),
    ]);
    let store = Arc::new(MemoryStore::new());

    let summary = convert(source.clone(), Arc::clone(&store), options(2, 256))
        .await
        .unwrap();
    assert_eq!(summary.series_count(), 2);
    assert_eq!(summary.resolutions, vec![3, 1]);
    assert_eq!(store.dataset_paths(), vec!["0/0", "0/1", "0/2", "1/0"]);
    assert_eq!(store.attributes("1/0").unwrap().data_type, DataType::Uint16);
    assert_full_resolution(&store, "1/0", source.series(1), &AxisOrder::default());
}

#[tokio::test]
async fn test_custom_path_format() {
    let source = SyntheticSource::single(SyntheticSeries::new(300, 300));
    let store = Arc::new(MemoryStore::new());

    let mut opts = options(1, 256);
    opts.path_format = "s{series}/r{resolution}".to_string();
    convert(source, Arc::clone(&store), opts).await.unwrap();
    assert_eq!(store.dataset_paths(), vec!["s0/r0", "s0/r1"]);
}

// =============================================================================
// Ordering / Resources
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_level_writes_finish_before_next_level_reads() {
    let source = SyntheticSource::single(SyntheticSeries::new(1100, 900).with_channels(2));
    let store = Arc::new(MemoryStore::new());

    convert(source, Arc::clone(&store), options(4, 64))
        .await
        .unwrap();

    let events = store.events();
    for r in 0..3 {
        let path = format!("0/{}", r);
        let next = format!("0/{}", r + 1);
        let last_write = events
            .iter()
            .rposition(|e| matches!(e, StoreEvent::Write(p, _) if *p == path))
            .unwrap();
        let first_read = events
            .iter()
            .position(|e| matches!(e, StoreEvent::Read(p, _) if *p == path))
            .unwrap();
        let next_create = events
            .iter()
            .position(|e| matches!(e, StoreEvent::Create(p) if *p == next))
            .unwrap();

        assert!(last_write < next_create, "{} created before {} drained", next, path);
        assert!(last_write < first_read, "{} read before it was complete", path);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_opened_once_and_closed() {
    let source = SyntheticSource::single(SyntheticSeries::new(800, 800));
    let store = Arc::new(MemoryStore::new());

    convert(source.clone(), store, options(3, 100)).await.unwrap();

    assert_eq!(source.opened.load(Ordering::SeqCst), 3);
    assert_eq!(source.closed.load(Ordering::SeqCst), 3);
    // Only resolution 0 decodes from the source
    assert_eq!(source.regions_read.load(Ordering::SeqCst), 64);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_chunk_write_aborts_conversion() {
    let source = SyntheticSource::single(SyntheticSeries::new(1000, 700));
    let store = Arc::new(MemoryStore::new().fail_write_at("0/1", GridPosition([1, 0, 0, 0, 0])));

    let err = convert(source.clone(), Arc::clone(&store), options(3, 128))
        .await
        .unwrap_err();
    assert!(
        matches!(err, ConvertError::Store(StoreError::Io { ref message, .. }) if message.contains("injected")),
        "unexpected error: {}",
        err
    );

    // No level after the failing one is created
    assert_eq!(store.dataset_paths(), vec!["0/0", "0/1"]);
    assert!(store.chunk("0/1", GridPosition([1, 0, 0, 0, 0])).is_none());
    assert_eq!(source.closed.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_in_first_series_skips_later_series() {
    let source = SyntheticSource::new(vec![
        SyntheticSeries::new(700, 520),
        SyntheticSeries::new(90, 60),
    ]);
    let store = Arc::new(MemoryStore::new().fail_write_at("0/1", GridPosition([1, 0, 0, 0, 0])));

    let err = convert(source.clone(), Arc::clone(&store), options(2, 256))
        .await
        .unwrap_err();
    assert!(
        matches!(err, ConvertError::Store(StoreError::Io { ref message, .. }) if message.contains("injected")),
        "unexpected error: {}",
        err
    );

    // Neither a later level nor the second series is touched
    assert_eq!(store.dataset_paths(), vec!["0/0", "0/1"]);
    assert!(store.events().iter().all(|event| match event {
        StoreEvent::Create(path) | StoreEvent::Write(path, _) | StoreEvent::Read(path, _) =>
            !path.starts_with("1/") && path != "0/2",
    }));
    assert_eq!(source.opened.load(Ordering::SeqCst), 2);
    assert_eq!(source.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_decode_failure_aborts_conversion() {
    let source = SyntheticSource::single(SyntheticSeries::new(512, 512)).failing_at((0, 0, 128, 256));
    let store = Arc::new(MemoryStore::new());

    let err = convert(source, Arc::clone(&store), options(2, 128))
        .await
        .unwrap_err();
    assert!(matches!(err, ConvertError::Source(SourceError::Decode(_))));
    assert_eq!(store.dataset_paths(), vec!["0/0"]);
    assert!(store.chunk("0/0", GridPosition([1, 2, 0, 0, 0])).is_none());
}

#[tokio::test]
async fn test_unsupported_pixel_type_fails_before_scheduling() {
    let source = SyntheticSource::single(
        SyntheticSeries::new(64, 64).with_pixel_type(PixelType::Float, false),
    );
    let store = Arc::new(MemoryStore::new());

    let err = convert(source.clone(), Arc::clone(&store), options(2, 32))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConvertError::Config(ConfigError::UnsupportedPixelType(PixelType::Float))
    ));
    assert!(store.dataset_paths().is_empty());
    assert_eq!(source.regions_read.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_too_many_resolutions_rejected_up_front() {
    let source = SyntheticSource::single(SyntheticSeries::new(300, 200));
    let store = Arc::new(MemoryStore::new());

    let mut opts = options(2, 256);
    opts.resolutions = Some(10);
    let err = convert(source, Arc::clone(&store), opts).await.unwrap_err();
    assert!(matches!(
        err,
        ConvertError::Config(ConfigError::EmptyResolution { resolution: 8, .. })
    ));
    assert!(store.dataset_paths().is_empty());
}

#[tokio::test]
async fn test_malformed_source_axis_order() {
    let source = SyntheticSource::single(SyntheticSeries::new(64, 64).with_dimension_order("XYZT"));
    let store = Arc::new(MemoryStore::new());

    let err = convert(source, Arc::clone(&store), options(1, 64))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConvertError::Config(ConfigError::InvalidAxisOrder { .. })
    ));
}

// =============================================================================
// Custom Downsampler
// =============================================================================

/// Keeps the top-left sample of every block.
struct TopLeft;

impl Downsampler for TopLeft {
    fn downsample(
        &self,
        source: &[u8],
        width: u32,
        height: u32,
        data_type: DataType,
        factor: u32,
    ) -> Vec<u8> {
        let bps = data_type.bytes_per_sample();
        let (width, factor) = (width as usize, factor as usize);
        let mut out = Vec::new();
        for y in (0..height as usize).step_by(factor) {
            for x in (0..width).step_by(factor) {
                let offset = (y * width + x) * bps;
                out.extend_from_slice(&source[offset..offset + bps]);
            }
        }
        out
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn test_custom_downsampler_builds_levels() {
    let series = SyntheticSeries::new(600, 400).with_pixel_type(PixelType::Uint16, false);
    let source = SyntheticSource::single(series.clone());
    let store = Arc::new(MemoryStore::new());

    let mut opts = options(2, 128);
    opts.resolutions = Some(2);
    let output = tempfile::tempdir().unwrap();
    PyramidConverter::new(source, Arc::clone(&store), opts)
        .with_downsampler(Arc::new(TopLeft))
        .convert(Path::new("synthetic.img"), output.path())
        .await
        .unwrap();

    let axes = AxisOrder::default();
    let level = store.plane("0/1", axes.zct_slots(), [0, 0, 0]);
    assert_eq!(level.len(), 300 * 200);
    for y in 0..200u32 {
        for x in 0..300u32 {
            assert_eq!(
                level[(y * 300 + x) as usize],
                series.sample(0, 2 * x, 2 * y),
                "({}, {})",
                x,
                y
            );
        }
    }
}
