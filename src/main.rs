//! WSI Pyramid - Convert whole slide images into chunked pyramids.
//!
//! This binary parses the command line, builds the runtime and runs one
//! conversion.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_pyramid::{
    config::Config, io::FilesystemStore, pyramid::PyramidConverter, slide::RasterSource,
};

fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    init_logging(config.debug);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    // Tile workers plus the enumerating driver
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.max_workers + 1)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run_convert(config))
}

// =============================================================================
// Convert Command
// =============================================================================

async fn run_convert(config: Config) -> ExitCode {
    let options = match config.convert_options() {
        Ok(options) => options,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = Arc::new(FilesystemStore::new(
        config.store_root(),
        config.container_kind(),
    ));

    info!("Configuration:");
    info!("  Input: {}", config.input.display());
    info!("  Output: {} ({:?})", store.root().display(), store.kind());
    info!(
        "  Tiles: {}x{}, {} workers",
        config.tile_width, config.tile_height, config.max_workers
    );
    info!("  Compression: {:?}", options.compression);
    if let Some(ref order) = options.axis_order {
        info!("  Dimension order override: {}", order);
    }

    if !config.uses_default_layout() {
        info!(
            "Pyramid name '{}' or scale format '{}' differs from the default; \
             downstream tools expecting the default layout may not read the output",
            config.pyramid_name(),
            config.scale_format_string
        );
    }

    let source = RasterSource::with_cache_capacity(config.cache_size);
    let converter = PyramidConverter::new(source, store, options);

    match converter.convert(&config.input, &config.output).await {
        Ok(summary) => {
            for (series, resolutions) in summary.resolutions.iter().enumerate() {
                info!("  Series {}: {} resolutions", series, resolutions);
            }
            info!(
                "Wrote {} tiles from {} input",
                summary.tiles_written, summary.format
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Conversion failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(debug: bool) {
    let env_filter = if debug {
        "wsi_pyramid=debug"
    } else {
        "wsi_pyramid=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
