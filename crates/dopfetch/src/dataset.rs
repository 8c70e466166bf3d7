//! Download results and their on-disk manifest.

use crate::geometry::{to_multi_polygon, BoundingBox, Crs};
use crate::{DopError, Result};
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name used when the polygon is saved into a directory.
pub const POLYGON_FILE_NAME: &str = "polygon.geojson";

/// File name of the manifest written into a dataset's output directory.
pub const MANIFEST_FILE_NAME: &str = "dataset.json";

/// Extensions [`delete_images`] is willing to remove.
const IMAGE_EXTENSIONS: &[&str] = &["png", "tiff", "tif"];

/// Where a tile sits and how it is sampled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileFootprint {
    /// Extent in the service CRS.
    pub bbox: BoundingBox,
    /// Width in pixels.
    pub width_px: u32,
    /// Height in pixels.
    pub height_px: u32,
    /// Meters per pixel.
    pub resolution_m: f64,
    /// Service CRS.
    pub crs: Crs,
}

/// Metadata of one downloaded tile.
///
/// A tile whose `image_path` is `None` failed to download; such a record
/// never carries a mask path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    image_path: Option<PathBuf>,
    mask_path: Option<PathBuf>,
    upper_left_x: f64,
    upper_left_y: f64,
    download_time: f64,
    width_m: f64,
    height_m: f64,
    width_px: u32,
    height_px: u32,
    resolution_m: f64,
    crs: Crs,
}

impl Image {
    /// Record of a tile written to `image_path`.
    pub fn new(footprint: &TileFootprint, image_path: PathBuf, mask_path: Option<PathBuf>, download_time: f64) -> Self {
        let (upper_left_x, upper_left_y) = footprint.bbox.upper_left();
        Self {
            image_path: Some(image_path),
            mask_path,
            upper_left_x,
            upper_left_y,
            download_time,
            width_m: footprint.width_px as f64 * footprint.resolution_m,
            height_m: footprint.height_px as f64 * footprint.resolution_m,
            width_px: footprint.width_px,
            height_px: footprint.height_px,
            resolution_m: footprint.resolution_m,
            crs: footprint.crs,
        }
    }

    /// Placeholder for a tile that could not be downloaded.
    pub fn failed(footprint: &TileFootprint, download_time: f64) -> Self {
        Self {
            image_path: None,
            mask_path: None,
            ..Self::new(footprint, PathBuf::new(), None, download_time)
        }
    }

    /// Whether this is a failure placeholder.
    pub fn is_failed(&self) -> bool {
        self.image_path.is_none()
    }

    /// Path of the GeoTIFF.
    pub fn image_path(&self) -> Option<&Path> {
        self.image_path.as_deref()
    }

    /// Path of the mask GeoTIFF.
    pub fn mask_path(&self) -> Option<&Path> {
        self.mask_path.as_deref()
    }

    /// World coordinates of the top-left corner.
    pub fn upper_left(&self) -> (f64, f64) {
        (self.upper_left_x, self.upper_left_y)
    }

    /// Seconds spent on fetch, decode and write.
    pub fn download_time(&self) -> f64 {
        self.download_time
    }

    /// Extent in meters.
    pub fn size_m(&self) -> (f64, f64) {
        (self.width_m, self.height_m)
    }

    /// Extent in pixels.
    pub fn size_px(&self) -> (u32, u32) {
        (self.width_px, self.height_px)
    }

    /// Meters per pixel.
    pub fn resolution_m(&self) -> f64 {
        self.resolution_m
    }

    /// CRS of the raster.
    pub fn crs(&self) -> Crs {
        self.crs
    }
}

/// The area polygon either held in memory or stored as a GeoJSON file.
#[derive(Debug, Clone, PartialEq)]
pub enum PolygonSource {
    /// Already loaded.
    InMemory(MultiPolygon<f64>),
    /// GeoJSON file to read on demand.
    OnDisk(PathBuf),
}

impl PolygonSource {
    /// Load the polygon.
    pub fn resolve(self) -> Result<MultiPolygon<f64>> {
        match self {
            PolygonSource::InMemory(area) => Ok(area),
            PolygonSource::OnDisk(path) => read_polygon(&path),
        }
    }
}

/// Serialized form of an [`AreaDataset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Dataset name.
    pub name: String,
    /// GeoJSON file holding the area polygon.
    pub polygon: PathBuf,
    /// Buffer applied around the polygon, in meters.
    pub buffer_size: u32,
    /// Output directory.
    pub out_path: PathBuf,
    /// CRS of polygon and tiles.
    pub crs: Crs,
    /// Per-tile records in grid order.
    pub images: Vec<Image>,
}

/// All tiles downloaded for one area from one service.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaDataset {
    /// Dataset name.
    pub name: String,
    /// The requested area (not the grid).
    pub polygon: MultiPolygon<f64>,
    /// Buffer applied around the polygon, in meters.
    pub buffer_size: u32,
    /// Output directory.
    pub out_path: PathBuf,
    /// CRS of polygon and tiles.
    pub crs: Crs,
    /// Per-tile records in grid order; `None` until the download finished.
    pub images: Option<Vec<Image>>,
}

impl AreaDataset {
    /// Empty dataset shell.
    pub fn new(name: impl Into<String>, polygon: MultiPolygon<f64>, buffer_size: u32, out_path: PathBuf, crs: Crs) -> Self {
        Self {
            name: name.into(),
            polygon,
            buffer_size,
            out_path,
            crs,
            images: None,
        }
    }

    /// Number of failure placeholders.
    pub fn failed_count(&self) -> usize {
        self.images
            .as_ref()
            .map_or(0, |images| images.iter().filter(|i| i.is_failed()).count())
    }

    /// Save the polygon to `save_polygon_to` and build the manifest.
    ///
    /// A directory argument stores the polygon as `polygon.geojson` inside it.
    pub fn to_manifest(&self, save_polygon_to: &Path) -> Result<Manifest> {
        let images = self
            .images
            .clone()
            .ok_or_else(|| DopError::MissingImages(self.name.clone()))?;

        let polygon_path = if save_polygon_to.is_dir() {
            save_polygon_to.join(POLYGON_FILE_NAME)
        } else {
            save_polygon_to.to_path_buf()
        };
        write_polygon(&polygon_path, &self.polygon, &self.crs)?;

        Ok(Manifest {
            name: self.name.clone(),
            polygon: polygon_path,
            buffer_size: self.buffer_size,
            out_path: self.out_path.clone(),
            crs: self.crs,
            images,
        })
    }

    /// Write polygon and manifest; the polygon lands next to the manifest.
    pub fn write_manifest(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let manifest = self.to_manifest(dir)?;
        fs::write(path, serde_json::to_string_pretty(&manifest)?)?;
        Ok(())
    }

    /// Rebuild a dataset, loading the polygon from the file the manifest names.
    pub fn from_manifest(manifest: Manifest) -> Result<Self> {
        let polygon = PolygonSource::OnDisk(manifest.polygon.clone());
        Self::from_parts(manifest, polygon)
    }

    /// Rebuild a dataset from manifest data and an explicit polygon source.
    pub fn from_parts(manifest: Manifest, polygon: PolygonSource) -> Result<Self> {
        Ok(Self {
            name: manifest.name,
            polygon: polygon.resolve()?,
            buffer_size: manifest.buffer_size,
            out_path: manifest.out_path,
            crs: manifest.crs,
            images: Some(manifest.images),
        })
    }
}

/// Read a manifest written by [`AreaDataset::write_manifest`].
pub fn read_manifest(path: &Path) -> Result<AreaDataset> {
    let manifest: Manifest = serde_json::from_str(&fs::read_to_string(path)?)?;
    AreaDataset::from_manifest(manifest)
}

fn write_polygon(path: &Path, area: &MultiPolygon<f64>, crs: &Crs) -> Result<()> {
    use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut foreign = JsonObject::new();
    foreign.insert(
        "crs".to_string(),
        serde_json::json!({
            "type": "name",
            "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", crs.code()) }
        }),
    );
    let collection = FeatureCollection {
        bbox: None,
        features: vec![Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(area))),
            id: None,
            properties: Some(JsonObject::new()),
            foreign_members: None,
        }],
        foreign_members: Some(foreign),
    };
    fs::write(path, GeoJson::from(collection).to_string())?;
    Ok(())
}

/// Read all areal geometries of a GeoJSON file into one multipolygon.
pub fn read_polygon(path: &Path) -> Result<MultiPolygon<f64>> {
    let geojson: geojson::GeoJson = fs::read_to_string(path)?.parse()?;
    let collection: geo::GeometryCollection<f64> = geojson::quick_collection(&geojson)?;

    let mut parts = Vec::new();
    for geometry in &collection.0 {
        parts.extend(to_multi_polygon(geometry, "polygon")?.0);
    }
    if parts.is_empty() {
        return Err(DopError::invalid_geometry("polygon", format!("{} holds no polygon", path.display())));
    }
    Ok(MultiPolygon::new(parts))
}

/// Files and subdirectories of a dataset directory, children first.
///
/// `None` when anything in the tree is not an image, a mask, the manifest
/// or the polygon file.
fn dataset_entries(dir: &Path) -> Result<Option<(Vec<PathBuf>, Vec<PathBuf>)>> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            match dataset_entries(&path)? {
                Some((sub_files, sub_dirs)) => {
                    files.extend(sub_files);
                    dirs.extend(sub_dirs);
                    dirs.push(path);
                }
                None => return Ok(None),
            }
            continue;
        }

        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        let is_owned = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == MANIFEST_FILE_NAME || n == POLYGON_FILE_NAME);
        if !(path.is_file() && (is_image || is_owned)) {
            warn!("Refusing to delete {}: {} is not part of a dataset", dir.display(), path.display());
            return Ok(None);
        }
        files.push(path);
    }
    Ok(Some((files, dirs)))
}

/// Delete a dataset's output directory.
///
/// Removes images and masks, the manifest and polygon file, and band
/// subdirectories such as `rgb/` and `cir/`. Returns `Ok(false)` without
/// touching anything when the directory is missing or holds anything else.
pub fn delete_images(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        warn!("Directory {} does not exist", dir.display());
        return Ok(false);
    }

    let Some((files, dirs)) = dataset_entries(dir)? else {
        return Ok(false);
    };
    if files.is_empty() {
        warn!("Directory {} is empty", dir.display());
    }

    for path in &files {
        fs::remove_file(path)?;
    }
    for path in &dirs {
        fs::remove_dir(path)?;
    }
    fs::remove_dir(dir)?;
    info!("Deleted {} files and directory {}", files.len(), dir.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ETRS89_UTM32;

    fn footprint() -> TileFootprint {
        TileFootprint {
            bbox: BoundingBox::new(500_000.0, 5_400_000.0, 501_000.0, 5_401_000.0),
            width_px: 5000,
            height_px: 5000,
            resolution_m: 0.2,
            crs: ETRS89_UTM32,
        }
    }

    #[test]
    fn test_image_records() {
        let ok = Image::new(&footprint(), PathBuf::from("out/1.tiff"), Some(PathBuf::from("out/1_mask.tiff")), 1.5);
        assert!(!ok.is_failed());
        assert_eq!(ok.upper_left(), (500_000.0, 5_401_000.0));
        assert_eq!(ok.size_m(), (1000.0, 1000.0));

        let failed = Image::failed(&footprint(), 0.25);
        assert!(failed.is_failed());
        assert!(failed.mask_path().is_none());
        assert_eq!(failed.size_px(), (5000, 5000));
        assert_eq!(failed.download_time(), 0.25);
    }

    #[test]
    fn test_manifest_requires_images() {
        let dir = tempfile::tempdir().unwrap();
        let area = MultiPolygon::new(vec![footprint().bbox.to_polygon()]);
        let dataset = AreaDataset::new("a", area, 0, dir.path().to_path_buf(), ETRS89_UTM32);
        assert!(matches!(
            dataset.to_manifest(dir.path()),
            Err(DopError::MissingImages(_))
        ));
    }

    #[test]
    fn test_manifest_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let area = MultiPolygon::new(vec![footprint().bbox.to_polygon()]);
        let mut dataset = AreaDataset::new("a", area, 10, dir.path().to_path_buf(), ETRS89_UTM32);
        dataset.images = Some(vec![
            Image::new(&footprint(), dir.path().join("1.tiff"), None, 2.0),
            Image::failed(&footprint(), 0.5),
        ]);

        let manifest = dataset.to_manifest(dir.path()).unwrap();
        assert_eq!(manifest.polygon, dir.path().join(POLYGON_FILE_NAME));

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["buffer_size"], 10);
        assert_eq!(json["crs"], "EPSG:25832");
        assert!(json["images"][0]["image_path"].is_string());
        assert!(json["images"][0]["width_px"].is_u64());
        assert!(json["images"][1]["image_path"].is_null());
        assert!(json["images"][1]["mask_path"].is_null());
    }

    #[test]
    fn test_delete_images() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        fs::create_dir(&images).unwrap();
        fs::write(images.join("1.tiff"), b"x").unwrap();
        fs::write(images.join("1_mask.tiff"), b"x").unwrap();
        fs::write(images.join("2.png"), b"x").unwrap();

        assert!(delete_images(&images).unwrap());
        assert!(!images.exists());
        assert!(!delete_images(&images).unwrap());
    }

    #[test]
    fn test_delete_images_refuses_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1.tiff"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        assert!(!delete_images(dir.path()).unwrap());
        assert!(dir.path().join("1.tiff").exists());
    }

    #[test]
    fn test_delete_rgbi_output() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("Bayern");
        for band in ["rgb", "cir"] {
            fs::create_dir_all(state.join(band)).unwrap();
            fs::write(state.join(band).join("BY_1.tiff"), b"x").unwrap();
            fs::write(state.join(band).join("BY_1_mask.tiff"), b"x").unwrap();
        }
        fs::write(state.join("BY_rgbi_1.tiff"), b"x").unwrap();
        fs::write(state.join(MANIFEST_FILE_NAME), b"{}").unwrap();
        fs::write(state.join(POLYGON_FILE_NAME), b"{}").unwrap();

        assert!(delete_images(&state).unwrap());
        assert!(!state.exists());
    }

    #[test]
    fn test_delete_refuses_foreign_file_in_band_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("rgb")).unwrap();
        fs::write(dir.path().join("rgb").join("1.tiff"), b"x").unwrap();
        fs::write(dir.path().join("rgb").join("readme.md"), b"x").unwrap();
        fs::write(dir.path().join("1.tiff"), b"x").unwrap();

        assert!(!delete_images(dir.path()).unwrap());
        assert!(dir.path().join("1.tiff").exists());
        assert!(dir.path().join("rgb").join("1.tiff").exists());
    }
}
