//! Downloads spanning several federal states.
//!
//! The area of interest is split along state borders and each part is
//! downloaded from its own state's service. A state that fails (missing
//! profile, unreachable service, any download error) is logged and left out
//! of the results; the remaining states are unaffected.

use crate::area::{AreaDownloader, DownloaderOptions};
use crate::boundaries::{BoundarySource, GeoJsonBoundaries, Jurisdiction};
use crate::catalog::{Catalog, ImageKind, StateCode};
use crate::dataset::AreaDataset;
use crate::geometry::{reproject, AreaOfInterest, Crs, GeoSeries, ETRS89_UTM32};
use crate::rgbi::RgbiDownloader;
use crate::service::{ClientOptions, ConnectionDescriptor, MapService, WmsClient};
use crate::{DopError, Result};
use geo::{Area, BooleanOps, Intersects, MultiPolygon};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

/// Builds a map service for a catalog entry.
pub type ClientFactory = Box<dyn Fn(&ConnectionDescriptor) -> Result<Arc<dyn MapService>> + Send + Sync>;

/// Factory producing real [`WmsClient`]s.
pub fn wms_client_factory(options: ClientOptions) -> ClientFactory {
    Box::new(move |descriptor: &ConnectionDescriptor| {
        let client = WmsClient::with_options(descriptor.clone(), options)?;
        Ok(Arc::new(client) as Arc<dyn MapService>)
    })
}

/// The part of the area of interest inside one state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateIntersection {
    /// Display name of the state.
    pub name: String,
    /// State code.
    pub code: StateCode,
    /// Intersection with the area, in the working CRS.
    pub geometry: MultiPolygon<f64>,
}

/// Per-state results, in detection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadResults {
    entries: Vec<(String, AreaDataset)>,
}

impl DownloadResults {
    fn insert(&mut self, name: String, dataset: AreaDataset) {
        self.entries.push((name, dataset));
    }

    /// Dataset of the state called `name`.
    pub fn get(&self, name: &str) -> Option<&AreaDataset> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// State names with results.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// `(state name, dataset)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AreaDataset)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// Number of states with results.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no state produced a result.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for DownloadResults {
    type Item = (String, AreaDataset);
    type IntoIter = std::vec::IntoIter<(String, AreaDataset)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Output directory of a state: its display name with `/` replaced.
pub fn state_dir_name(name: &str) -> String {
    name.replace('/', "_")
}

/// File prefix of a state: `{prefix}_{code}` or just the code.
pub fn state_prefix(prefix: Option<&str>, code: StateCode) -> String {
    match prefix {
        Some(prefix) => format!("{}_{}", prefix, code),
        None => code.to_string(),
    }
}

/// Splits areas by state and downloads each part from the right service.
pub struct AutoDownloader {
    grid_spacing: u32,
    catalog: Catalog,
    boundaries: Box<dyn BoundarySource>,
    options: DownloaderOptions,
    client_factory: ClientFactory,
    states: OnceLock<Vec<Jurisdiction>>,
    crs: Crs,
}

impl std::fmt::Debug for AutoDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoDownloader")
            .field("grid_spacing", &self.grid_spacing)
            .field("profiles", &self.catalog.len())
            .field("boundaries_loaded", &self.states.get().is_some())
            .finish()
    }
}

impl AutoDownloader {
    /// Downloader over the built-in catalog and the default boundary file.
    pub fn germany(grid_spacing: u32) -> Self {
        Self::new(grid_spacing, Catalog::germany(), Box::new(GeoJsonBoundaries::default()))
    }

    /// Downloader over an explicit catalog and boundary source.
    pub fn new(grid_spacing: u32, catalog: Catalog, boundaries: Box<dyn BoundarySource>) -> Self {
        Self {
            grid_spacing,
            catalog,
            boundaries,
            options: DownloaderOptions::default(),
            client_factory: wms_client_factory(ClientOptions::default()),
            states: OnceLock::new(),
            crs: ETRS89_UTM32,
        }
    }

    /// Options for the per-state area downloaders.
    pub fn with_options(mut self, options: DownloaderOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace how map services are built.
    pub fn with_client_factory(mut self, factory: ClientFactory) -> Self {
        self.client_factory = factory;
        self
    }

    /// The working CRS of detection and splitting.
    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// State outlines, loaded on first use.
    pub fn jurisdictions(&self) -> Result<&[Jurisdiction]> {
        if let Some(states) = self.states.get() {
            return Ok(states.as_slice());
        }
        let loaded = self.boundaries.load(&self.crs)?;
        Ok(self.states.get_or_init(|| loaded).as_slice())
    }

    /// States overlapping `area`, in boundary-source order, each with the
    /// overlapping part of the area.
    pub fn detect_intersecting(&self, area: &AreaOfInterest) -> Result<Vec<StateIntersection>> {
        let area = area.to_area(&self.crs)?;
        let mut found = Vec::new();

        for state in self.jurisdictions()? {
            if !state.geometry.intersects(&area) {
                continue;
            }
            let part = state.geometry.intersection(&area);
            if part.0.is_empty() || part.unsigned_area() == 0.0 {
                continue;
            }
            info!("Area intersects {} ({})", state.name, state.code);
            found.push(StateIntersection {
                name: state.name.clone(),
                code: state.code,
                geometry: part,
            });
        }
        Ok(found)
    }

    fn detect_or_fail(&self, area: &AreaOfInterest) -> Result<Vec<StateIntersection>> {
        let states = self.detect_intersecting(area)?;
        if states.is_empty() {
            return Err(DopError::NoIntersectingStates);
        }
        Ok(states)
    }

    fn downloader(&self, code: StateCode, kind: ImageKind) -> Result<AreaDownloader> {
        let descriptor = self.catalog.get(code, kind)?;
        let service = (self.client_factory)(descriptor)?;
        AreaDownloader::with_options(service, self.grid_spacing, self.options.clone())
    }

    /// The intersection as a series in the downloader's CRS.
    fn state_area(&self, state: &StateIntersection, target: &Crs) -> Result<GeoSeries> {
        let geometry = reproject(&state.geometry, &self.crs, target)?;
        Ok(GeoSeries::single(geometry, *target))
    }

    fn validate_mask(&self, mask: Option<&GeoSeries>) -> Result<()> {
        if let Some(mask) = mask {
            mask.single_area(&self.crs, "mask")?;
        }
        Ok(())
    }

    /// The mask, already validated in the working CRS, in the downloader's CRS.
    fn state_mask(&self, mask: Option<&GeoSeries>, target: &Crs) -> Result<Option<GeoSeries>> {
        mask.map(|mask| -> Result<GeoSeries> {
            let area = mask.single_area(&self.crs, "mask")?;
            Ok(GeoSeries::single(reproject(&area, &self.crs, target)?, *target))
        })
        .transpose()
    }

    /// Download `kind` imagery for every state overlapping `area`.
    ///
    /// Each state's part goes to `{out_path}/{state name}` with files named
    /// `{prefix}_{code}_{i}.tiff` (or `{code}_{i}.tiff`). States that fail are
    /// missing from the result.
    #[allow(clippy::too_many_arguments)]
    pub fn download_auto(
        &self,
        area_name: &str,
        area: &AreaOfInterest,
        out_path: &Path,
        kind: ImageKind,
        prefix: Option<&str>,
        mask: Option<&GeoSeries>,
        buffer_size: u32,
    ) -> Result<DownloadResults> {
        self.validate_mask(mask)?;
        let states = self.detect_or_fail(area)?;
        let mut results = DownloadResults::default();

        for state in &states {
            info!("Downloading {} for {} ({})", kind, state.name, state.code);
            let state_out = out_path.join(state_dir_name(&state.name));
            let outcome = self.downloader(state.code, kind).and_then(|downloader| {
                let series = self.state_area(state, &downloader.crs())?;
                let mask = self.state_mask(mask, &downloader.crs())?;
                downloader.download_with_prefix(
                    &format!("{}_{}", area_name, state.name),
                    &series,
                    &state_out,
                    buffer_size,
                    mask.as_ref(),
                    Some(&state_prefix(prefix, state.code)),
                )
            });

            match outcome {
                Ok(dataset) => {
                    info!(
                        "{}: {} images, {} failed",
                        state.name,
                        dataset.images.as_ref().map_or(0, Vec::len),
                        dataset.failed_count()
                    );
                    results.insert(state.name.clone(), dataset);
                }
                Err(e) => error!("Failed to download {} from {} ({}): {}", kind, state.name, state.code, e),
            }
        }
        Ok(results)
    }

    /// [`download_auto`](Self::download_auto) for RGB imagery.
    pub fn download_rgb_auto(
        &self,
        area_name: &str,
        area: &AreaOfInterest,
        out_path: &Path,
        prefix: Option<&str>,
        mask: Option<&GeoSeries>,
        buffer_size: u32,
    ) -> Result<DownloadResults> {
        self.download_auto(area_name, area, out_path, ImageKind::Rgb, prefix, mask, buffer_size)
    }

    /// [`download_auto`](Self::download_auto) for CIR imagery.
    pub fn download_cir_auto(
        &self,
        area_name: &str,
        area: &AreaOfInterest,
        out_path: &Path,
        prefix: Option<&str>,
        mask: Option<&GeoSeries>,
        buffer_size: u32,
    ) -> Result<DownloadResults> {
        self.download_auto(area_name, area, out_path, ImageKind::Cir, prefix, mask, buffer_size)
    }

    /// Download RGB and CIR for every overlapping state and merge them into
    /// four-band tiles. States without a CIR service are dropped.
    pub fn download_rgbi_auto(
        &self,
        area_name: &str,
        area: &AreaOfInterest,
        out_path: &Path,
        prefix: Option<&str>,
        mask: Option<&GeoSeries>,
        buffer_size: u32,
    ) -> Result<DownloadResults> {
        self.validate_mask(mask)?;
        let states = self.detect_or_fail(area)?;
        let mut results = DownloadResults::default();

        for state in &states {
            info!("Downloading RGBI for {} ({})", state.name, state.code);
            let state_out: PathBuf = out_path.join(state_dir_name(&state.name));
            let outcome = self
                .downloader(state.code, ImageKind::Rgb)
                .and_then(|rgb| Ok((rgb, self.downloader(state.code, ImageKind::Cir)?)))
                .and_then(|(rgb, cir)| RgbiDownloader::new(rgb, cir))
                .and_then(|merger| {
                    let series = self.state_area(state, &merger.crs())?;
                    let mask = self.state_mask(mask, &merger.crs())?;
                    merger.download(
                        &format!("{}_{}", area_name, state.name),
                        &series,
                        &state_out,
                        buffer_size,
                        mask.as_ref(),
                        Some(&state_prefix(prefix, state.code)),
                    )
                });

            match outcome {
                Ok(dataset) => {
                    info!(
                        "{}: {} RGBI tiles, {} failed",
                        state.name,
                        dataset.images.as_ref().map_or(0, Vec::len),
                        dataset.failed_count()
                    );
                    results.insert(state.name.clone(), dataset);
                }
                Err(e) => error!("Failed to download RGBI from {} ({}): {}", state.name, state.code, e),
            }
        }
        Ok(results)
    }
}
