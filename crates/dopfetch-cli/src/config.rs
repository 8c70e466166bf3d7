//! Run configuration.
//!
//! Values come from an optional YAML file; every field has a default and
//! command line flags override whatever the file sets.

use crate::CliError;
use clap::{Args, ValueEnum};
use dopfetch::{
    bkg_dop20_rgb, wms_client_factory, AutoDownloader, BoundaryLocation, Catalog, ClientOptions, Crs,
    DownloaderOptions, GeoJsonBoundaries, ImageKind, Secret, StateCode, DEFAULT_BOUNDARIES_URL, ETRS89_UTM32,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// What to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    /// True colour.
    Rgb,
    /// Colour infrared.
    Cir,
    /// RGB merged with the infrared band of CIR.
    Rgbi,
}

/// Settings of one `dopfetch download` run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadConfig {
    /// Tile side in meters.
    pub grid_spacing: u32,
    /// Extra coverage around the area in meters.
    pub buffer_size: u32,
    pub image_kind: Product,
    pub filename_prefix: Option<String>,
    /// Root output directory; each state gets a subdirectory.
    pub out_path: PathBuf,
    /// Concurrent tile downloads per area.
    pub workers: usize,
    pub timeout_secs: u64,
    /// Extra attempts for tiles failing with a transport error.
    pub retries: u32,
    /// URL or path of the state boundary GeoJSON.
    pub boundaries: String,
    /// CRS of polygon files passed as area or mask.
    pub area_crs: Crs,
    /// Credential for the federal BKG service; replaces every state's RGB source.
    pub bkg_uuid: Option<Secret>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            grid_spacing: 1000,
            buffer_size: 0,
            image_kind: Product::Rgb,
            filename_prefix: None,
            out_path: PathBuf::from("./dop"),
            workers: 1,
            timeout_secs: 60,
            retries: 2,
            boundaries: DEFAULT_BOUNDARIES_URL.to_string(),
            area_crs: ETRS89_UTM32,
            bkg_uuid: None,
        }
    }
}

/// Command line flags that override the configuration file.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Tile side in meters
    #[arg(long)]
    pub spacing: Option<u32>,

    /// Image product
    #[arg(long, value_enum)]
    pub kind: Option<Product>,

    /// File name prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Output directory
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Buffer around the area in meters
    #[arg(long)]
    pub buffer: Option<u32>,

    /// Concurrent tile downloads
    #[arg(long)]
    pub workers: Option<usize>,

    /// Retries per failing tile
    #[arg(long)]
    pub retries: Option<u32>,

    /// Request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// URL or path of the state boundary GeoJSON
    #[arg(long)]
    pub boundaries: Option<String>,

    /// CRS of --area and --mask files, e.g. EPSG:4326
    #[arg(long)]
    pub area_crs: Option<String>,

    /// BKG credential; use the federal DOP20 service for RGB everywhere
    #[arg(long)]
    pub bkg_uuid: Option<String>,
}

impl DownloadConfig {
    /// Parse a YAML document. An empty document yields the defaults.
    pub fn from_yaml(text: &str) -> Result<Self, CliError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Apply command line overrides.
    pub fn apply(&mut self, overrides: &Overrides) -> Result<(), CliError> {
        if let Some(spacing) = overrides.spacing {
            self.grid_spacing = spacing;
        }
        if let Some(kind) = overrides.kind {
            self.image_kind = kind;
        }
        if let Some(prefix) = &overrides.prefix {
            self.filename_prefix = Some(prefix.clone());
        }
        if let Some(out) = &overrides.out {
            self.out_path = out.clone();
        }
        if let Some(buffer) = overrides.buffer {
            self.buffer_size = buffer;
        }
        if let Some(workers) = overrides.workers {
            self.workers = workers;
        }
        if let Some(retries) = overrides.retries {
            self.retries = retries;
        }
        if let Some(timeout) = overrides.timeout {
            self.timeout_secs = timeout;
        }
        if let Some(boundaries) = &overrides.boundaries {
            self.boundaries = boundaries.clone();
        }
        if let Some(crs) = &overrides.area_crs {
            self.area_crs = crs.parse()?;
        }
        if let Some(uuid) = &overrides.bkg_uuid {
            self.bkg_uuid = Some(Secret::new(uuid.clone()));
        }
        self.validate()
    }

    /// Reject settings no download could run with.
    pub fn validate(&self) -> Result<(), CliError> {
        if self.workers == 0 {
            return Err(CliError::Config("workers must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(CliError::Config("timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn downloader_options(&self) -> DownloaderOptions {
        DownloaderOptions {
            workers: self.workers,
            retries: self.retries,
            ..Default::default()
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    /// The built-in service catalog, with the BKG service swapped in for
    /// RGB when a credential is configured.
    pub fn catalog(&self) -> Catalog {
        let mut catalog = Catalog::germany();
        if let Some(uuid) = &self.bkg_uuid {
            info!("Using the BKG DOP20 service for RGB imagery in all states");
            for code in StateCode::ALL {
                catalog.insert(code, ImageKind::Rgb, bkg_dop20_rgb(uuid.clone()));
            }
        }
        catalog
    }

    /// A multi-state downloader wired to the real services.
    pub fn auto_downloader(&self) -> AutoDownloader {
        let boundaries = GeoJsonBoundaries::new(BoundaryLocation::parse(&self.boundaries));
        AutoDownloader::new(self.grid_spacing, self.catalog(), Box::new(boundaries))
            .with_options(self.downloader_options())
            .with_client_factory(wms_client_factory(self.client_options()))
    }
}
