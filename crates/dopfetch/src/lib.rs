//! # dopfetch
//!
//! Tile-by-tile downloader for German digital orthophotos (DOP) served by the
//! WMS services of the federal states.
//!
//! ## Overview
//!
//! An area of interest is covered by a grid of fixed-size square tiles whose
//! corners sit on multiples of the tile size, so independent downloads of
//! neighbouring areas line up. Each tile is fetched from a map service,
//! written as a GeoTIFF placed at its world position and recorded in an
//! [`AreaDataset`]. A tile that cannot be fetched becomes a failure
//! placeholder instead of aborting the download.
//!
//! Areas crossing state borders are handled by the [`AutoDownloader`], which
//! splits the area along the borders and uses each state's own service from
//! the built-in [`Catalog`].
//!
//! ## Examples
//!
//! ### One area, one service
//!
//! ```no_run
//! use dopfetch::{AreaDownloader, Catalog, GeoSeries, ImageKind, StateCode, WmsClient};
//! use dopfetch::{BoundingBox, ETRS89_UTM32};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let catalog = Catalog::germany();
//! let descriptor = catalog.get(StateCode::BY, ImageKind::Rgb)?.clone();
//! let downloader = AreaDownloader::new(Arc::new(WmsClient::new(descriptor)?), 1000)?;
//!
//! let area = BoundingBox::new(690_000.0, 5_334_000.0, 693_000.0, 5_337_000.0).to_polygon();
//! let dataset = downloader.download(
//!     "munich",
//!     &GeoSeries::single(area, ETRS89_UTM32),
//!     Path::new("out/munich"),
//!     0,
//!     None,
//! )?;
//! println!("{} tiles, {} failed", dataset.images.as_ref().map_or(0, Vec::len), dataset.failed_count());
//! # Ok::<(), dopfetch::DopError>(())
//! ```
//!
//! ### Areas across state borders
//!
//! ```no_run
//! use dopfetch::{AreaOfInterest, AutoDownloader, BoundingBox, ImageKind};
//! use std::path::Path;
//!
//! let downloader = AutoDownloader::germany(1000);
//! let area = AreaOfInterest::from(BoundingBox::new(600_000.0, 5_600_000.0, 606_000.0, 5_604_000.0).to_polygon());
//!
//! let results = downloader.download_auto("border", &area, Path::new("out"), ImageKind::Rgb, None, None, 0)?;
//! for (state, dataset) in results.iter() {
//!     println!("{}: {} failed tiles", state, dataset.failed_count());
//! }
//! # Ok::<(), dopfetch::DopError>(())
//! ```

mod acquire;
mod area;
mod boundaries;
mod catalog;
mod coordinator;
mod dataset;
mod error;
mod geometry;
mod grid;
mod raster;
mod rgbi;
mod service;

pub use acquire::{acquire, decode_rgb, mask_path_for};
pub use area::{tile_file_name, AreaDownloader, DownloaderOptions};
pub use boundaries::{
    BoundaryLocation, BoundarySource, GeoJsonBoundaries, Jurisdiction, StaticBoundaries, DEFAULT_BOUNDARIES_URL,
};
pub use catalog::{bavaria_dop40_rgb, bkg_dop20_rgb, Catalog, ImageKind, StateCode, BAVARIA_MAX_PIXELS, DOP20_RESOLUTION};
pub use coordinator::{
    state_dir_name, state_prefix, wms_client_factory, AutoDownloader, ClientFactory, DownloadResults,
    StateIntersection,
};
pub use dataset::{
    delete_images, read_manifest, read_polygon, AreaDataset, Image, Manifest, PolygonSource, TileFootprint,
    MANIFEST_FILE_NAME, POLYGON_FILE_NAME,
};
pub use error::{DopError, ErrorKind};
pub use geometry::{reproject, to_multi_polygon, AreaOfInterest, BoundingBox, Crs, GeoSeries, ETRS89_UTM32, WGS84};
pub use grid::{filter_by_mask, make_grid, GridTile};
pub use raster::{rasterize, read_raster, write_mask, write_rgb, write_rgbi, GeoTransform, RasterData};
pub use rgbi::{merge_tile, RgbiDownloader};
pub use service::{
    ClientOptions, ConnectionDescriptor, DownloadStats, ImageFormat, MapService, Secret, WmsClient, WmsVersion,
    DEFAULT_TIMEOUT,
};

/// Result type for orthophoto operations.
pub type Result<T> = std::result::Result<T, DopError>;
