//! The work behind `dopfetch download`.

use crate::config::{DownloadConfig, Product};
use crate::CliError;
use dopfetch::{
    read_polygon, reproject, AreaOfInterest, AutoDownloader, BoundingBox, Crs, GeoSeries, MANIFEST_FILE_NAME,
};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where the area of interest comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum AreaInput {
    /// `west, south, east, north` in EPSG:25832.
    Bounds([f64; 4]),
    /// A GeoJSON file.
    File(PathBuf),
}

impl AreaInput {
    /// Load the area. Files are read as `crs`.
    pub fn load(&self, crs: Crs) -> Result<AreaOfInterest, CliError> {
        match self {
            AreaInput::Bounds([west, south, east, north]) => {
                if west >= east || south >= north {
                    return Err(CliError::Config(format!(
                        "bounds must satisfy west < east and south < north, got {} {} {} {}",
                        west, south, east, north
                    )));
                }
                Ok(AreaOfInterest::from(BoundingBox::new(*west, *south, *east, *north).to_polygon()))
            }
            AreaInput::File(path) => {
                let polygon = read_polygon(path)?;
                Ok(AreaOfInterest::Series(GeoSeries::single(polygon, crs)))
            }
        }
    }
}

/// Read a mask polygon given in `crs` and bring it into the working CRS.
pub fn load_mask(path: &Path, crs: Crs, working: Crs) -> Result<GeoSeries, CliError> {
    let mask = read_polygon(path)?;
    let mask = reproject(&mask, &crs, &working)?;
    Ok(GeoSeries::single(mask, working))
}

/// Outcome for one state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSummary {
    pub name: String,
    pub tiles: usize,
    pub failed: usize,
    pub manifest: PathBuf,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadSummary {
    /// States with a dataset, in detection order.
    pub states: Vec<StateSummary>,
    /// States that intersect the area but produced nothing.
    pub dropped: Vec<String>,
}

impl DownloadSummary {
    pub fn failed_tiles(&self) -> usize {
        self.states.iter().map(|s| s.failed).sum()
    }
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for state in &self.states {
            writeln!(
                f,
                "{}: {} tiles, {} failed -> {}",
                state.name,
                state.tiles,
                state.failed,
                state.manifest.display()
            )?;
        }
        if !self.dropped.is_empty() {
            writeln!(f, "Dropped: {}", self.dropped.join(", "))?;
        }
        write!(f, "{} states, {} failed tiles", self.states.len(), self.failed_tiles())
    }
}

/// Download `area` for every intersecting state and write one manifest per
/// state directory.
pub fn run_download(
    downloader: &AutoDownloader,
    config: &DownloadConfig,
    area_name: &str,
    area: &AreaOfInterest,
    mask: Option<&GeoSeries>,
) -> Result<DownloadSummary, CliError> {
    let prefix = config.filename_prefix.as_deref();
    let out = config.out_path.as_path();
    let buffer = config.buffer_size;

    let results = match config.image_kind {
        Product::Rgb => downloader.download_rgb_auto(area_name, area, out, prefix, mask, buffer)?,
        Product::Cir => downloader.download_cir_auto(area_name, area, out, prefix, mask, buffer)?,
        Product::Rgbi => downloader.download_rgbi_auto(area_name, area, out, prefix, mask, buffer)?,
    };

    let mut summary = DownloadSummary::default();
    for (name, dataset) in results.iter() {
        let manifest = dataset.out_path.join(MANIFEST_FILE_NAME);
        dataset.write_manifest(&manifest)?;
        info!("Wrote manifest {}", manifest.display());
        summary.states.push(StateSummary {
            name: name.to_string(),
            tiles: dataset.images.as_ref().map_or(0, Vec::len),
            failed: dataset.failed_count(),
            manifest,
        });
    }

    // boundaries are cached, so this does not reload them
    for state in downloader.detect_intersecting(area)? {
        if results.get(&state.name).is_none() {
            warn!("No imagery for {}", state.name);
            summary.dropped.push(state.name);
        }
    }
    Ok(summary)
}
