//! Download every grid tile of one area from one service.
//!
//! A failing tile never aborts the area: after the configured retries it is
//! recorded as a failure placeholder and the loop moves on, so the returned
//! dataset always has one entry per planned tile, in grid order.

use crate::acquire::acquire;
use crate::dataset::{AreaDataset, Image, TileFootprint};
use crate::error::ErrorKind;
use crate::geometry::{Crs, GeoSeries};
use crate::grid::{filter_by_mask, make_grid, GridTile};
use crate::service::MapService;
use crate::{DopError, Result};
use geo::MultiPolygon;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Scale used to compare spacing and resolution without float error.
const MICRO: f64 = 1_000_000.0;

/// Tuning knobs of an [`AreaDownloader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderOptions {
    /// Concurrent tile downloads; 1 downloads sequentially.
    pub workers: usize,
    /// Extra attempts per tile after a transport failure.
    pub retries: u32,
    /// Extension of the written files.
    pub file_extension: String,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            retries: 2,
            file_extension: "tiff".to_string(),
        }
    }
}

/// Grid spacing in pixels, or an error when it is not a whole multiple of
/// the resolution.
fn pixels_per_tile(grid_spacing: u32, resolution_m: f64) -> Result<u32> {
    let invalid = || DopError::InvalidGridSpacing {
        spacing: grid_spacing,
        resolution: resolution_m,
    };
    if grid_spacing == 0 || resolution_m.is_nan() || resolution_m <= 0.0 {
        return Err(invalid());
    }
    let resolution = (resolution_m * MICRO).round() as u64;
    let spacing = grid_spacing as u64 * MICRO as u64;
    if resolution == 0 || spacing % resolution != 0 {
        return Err(invalid());
    }
    u32::try_from(spacing / resolution).map_err(|_| invalid())
}

/// Output file name of tile `number` (1-based).
pub fn tile_file_name(prefix: Option<&str>, number: usize, extension: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}_{}.{}", prefix, number, extension),
        None => format!("{}.{}", number, extension),
    }
}

/// Downloads areas from a single map service on a fixed grid.
pub struct AreaDownloader {
    service: Arc<dyn MapService>,
    grid_spacing: u32,
    tile_px: u32,
    options: DownloaderOptions,
}

impl std::fmt::Debug for AreaDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AreaDownloader")
            .field("url", &self.service.descriptor().redacted_url())
            .field("layer", &self.service.descriptor().layer)
            .field("grid_spacing", &self.grid_spacing)
            .field("tile_px", &self.tile_px)
            .finish()
    }
}

impl AreaDownloader {
    /// Create a downloader with default options.
    pub fn new(service: Arc<dyn MapService>, grid_spacing: u32) -> Result<Self> {
        Self::with_options(service, grid_spacing, DownloaderOptions::default())
    }

    /// Create a downloader.
    ///
    /// Fails before any network traffic if `grid_spacing` is not a whole
    /// multiple of the service resolution or the resulting tile exceeds the
    /// service's pixel limit.
    pub fn with_options(service: Arc<dyn MapService>, grid_spacing: u32, options: DownloaderOptions) -> Result<Self> {
        let descriptor = service.descriptor();
        let tile_px = pixels_per_tile(grid_spacing, descriptor.resolution_m)?;
        descriptor.validate_pixels(tile_px, tile_px)?;

        Ok(Self {
            service,
            grid_spacing,
            tile_px,
            options,
        })
    }

    /// Tile side in meters.
    pub fn grid_spacing(&self) -> u32 {
        self.grid_spacing
    }

    /// Tile side in pixels.
    pub fn tile_px(&self) -> u32 {
        self.tile_px
    }

    /// Service resolution in meters per pixel.
    pub fn resolution_m(&self) -> f64 {
        self.service.descriptor().resolution_m
    }

    /// Service CRS.
    pub fn crs(&self) -> Crs {
        self.service.descriptor().crs
    }

    /// Options in use.
    pub fn options(&self) -> &DownloaderOptions {
        &self.options
    }

    /// Download `area` into `out_path` with files named `1.tiff`, `2.tiff`, ...
    pub fn download(
        &self,
        area_name: &str,
        area: &GeoSeries,
        out_path: &Path,
        buffer_size: u32,
        mask: Option<&GeoSeries>,
    ) -> Result<AreaDataset> {
        self.download_with_prefix(area_name, area, out_path, buffer_size, mask, None)
    }

    /// Like [`download`](Self::download), naming files `{prefix}_{i}.tiff`.
    pub fn download_with_prefix(
        &self,
        area_name: &str,
        area: &GeoSeries,
        out_path: &Path,
        buffer_size: u32,
        mask: Option<&GeoSeries>,
        prefix: Option<&str>,
    ) -> Result<AreaDataset> {
        let crs = self.crs();
        let polygon = area.single_area(&crs, "area_polygon")?;
        let mask = mask.map(|m| m.single_area(&crs, "mask")).transpose()?;

        let tiles = self.plan(&polygon, buffer_size, mask.as_ref())?;
        self.download_prepared(area_name, polygon, out_path, buffer_size, &tiles, mask.as_ref(), prefix)
    }

    /// Covering grid of `polygon`, reduced to the tiles touching `mask`.
    pub fn plan(&self, polygon: &MultiPolygon<f64>, buffer_size: u32, mask: Option<&MultiPolygon<f64>>) -> Result<Vec<GridTile>> {
        let tiles = make_grid(polygon, buffer_size, self.grid_spacing)?;
        match mask {
            Some(mask) => {
                let total = tiles.len();
                let (kept, removed) = filter_by_mask(tiles, mask);
                info!(
                    "Mask filter: {} tiles total, {} removed, {} remaining",
                    total,
                    removed,
                    kept.len()
                );
                Ok(kept)
            }
            None => Ok(tiles),
        }
    }

    /// Download an already planned tile list.
    ///
    /// Tile `i` of `tiles` is written as number `i + 1`, so two downloaders
    /// given the same list produce matching file numbers.
    #[allow(clippy::too_many_arguments)]
    pub fn download_prepared(
        &self,
        area_name: &str,
        polygon: MultiPolygon<f64>,
        out_path: &Path,
        buffer_size: u32,
        tiles: &[GridTile],
        mask: Option<&MultiPolygon<f64>>,
        prefix: Option<&str>,
    ) -> Result<AreaDataset> {
        fs::create_dir_all(out_path)?;
        let mut dataset = AreaDataset::new(area_name, polygon, buffer_size, out_path.to_path_buf(), self.crs());

        info!(
            "Downloading {} tiles of {} m for '{}' into {}",
            tiles.len(),
            self.grid_spacing,
            area_name,
            out_path.display()
        );
        let start = Instant::now();

        let images = if self.options.workers > 1 {
            self.download_parallel(tiles, out_path, mask, prefix)
        } else {
            tiles
                .iter()
                .enumerate()
                .map(|(index, tile)| self.download_tile(index, tile, out_path, mask, prefix))
                .collect()
        };

        dataset.images = Some(images);
        let failed = dataset.failed_count();
        if failed > 0 {
            warn!("'{}': {} of {} tiles failed", area_name, failed, tiles.len());
        }
        info!(
            "'{}': finished {} tiles in {:.1}s",
            area_name,
            tiles.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(dataset)
    }

    fn download_parallel(
        &self,
        tiles: &[GridTile],
        out_path: &Path,
        mask: Option<&MultiPolygon<f64>>,
        prefix: Option<&str>,
    ) -> Vec<Image> {
        let done = AtomicUsize::new(0);
        let run = || -> Vec<Image> {
            tiles
                .par_iter()
                .enumerate()
                .map(|(index, tile)| {
                    let image = self.download_tile(index, tile, out_path, mask, prefix);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    info!("Progress: {}/{} tiles", n, tiles.len());
                    image
                })
                .collect()
        };

        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers)
            .build()
        {
            Ok(pool) => pool.install(run),
            Err(e) => {
                warn!("Could not start {} workers ({}), using the global pool", self.options.workers, e);
                run()
            }
        }
    }

    fn download_tile(
        &self,
        index: usize,
        tile: &GridTile,
        out_path: &Path,
        mask: Option<&MultiPolygon<f64>>,
        prefix: Option<&str>,
    ) -> Image {
        let number = index + 1;
        let dest: PathBuf = out_path.join(tile_file_name(prefix, number, &self.options.file_extension));
        let start = Instant::now();

        let mut attempt = 0;
        loop {
            match acquire(&dest, &tile.bbox, self.service.as_ref(), self.tile_px, self.tile_px, mask) {
                Ok(image) => return image,
                Err(e) if attempt < self.options.retries && e.kind() == ErrorKind::Transport => {
                    attempt += 1;
                    warn!("Tile {} failed ({}), retry {}/{}", number, e, attempt, self.options.retries);
                }
                Err(e) => {
                    error!("Tile {} at {:?} failed: {}", number, tile.bbox, e);
                    let footprint = TileFootprint {
                        bbox: tile.bbox,
                        width_px: self.tile_px,
                        height_px: self.tile_px,
                        resolution_m: self.resolution_m(),
                        crs: self.crs(),
                    };
                    return Image::failed(&footprint, start.elapsed().as_secs_f64());
                }
            }
        }
    }
}
