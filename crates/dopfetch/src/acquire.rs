//! Fetch one tile and write it as a georeferenced raster.

use crate::dataset::{Image, TileFootprint};
use crate::geometry::BoundingBox;
use crate::raster::{self, GeoTransform};
use crate::service::MapService;
use crate::{DopError, Result};
use geo::MultiPolygon;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

/// Path of the mask written next to `image_path`: `<stem>_mask.<ext>`.
pub fn mask_path_for(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match image_path.extension() {
        Some(ext) => format!("{}_mask.{}", stem, ext.to_string_lossy()),
        None => format!("{}_mask", stem),
    };
    image_path.with_file_name(name)
}

/// Decode a service response into tightly packed 8-bit RGB.
///
/// Alpha is dropped, grey is expanded to three bands.
pub fn decode_rgb(bytes: &[u8], width_px: u32, height_px: u32) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)?;
    if decoded.width() != width_px || decoded.height() != height_px {
        return Err(DopError::UnexpectedImageSize {
            expected_width: width_px,
            expected_height: height_px,
            width: decoded.width(),
            height: decoded.height(),
        });
    }
    Ok(decoded.to_rgb8().into_raw())
}

/// Download the tile `bbox` from `service` into `dest`.
///
/// When `mask` is given, the part of it inside the tile is burned into a
/// single-band raster written to [`mask_path_for`]`(dest)`. Any failure is
/// returned as an error; no partial record is produced.
pub fn acquire(
    dest: &Path,
    bbox: &BoundingBox,
    service: &dyn MapService,
    width_px: u32,
    height_px: u32,
    mask: Option<&MultiPolygon<f64>>,
) -> Result<Image> {
    let start = Instant::now();
    let descriptor = service.descriptor();
    let footprint = TileFootprint {
        bbox: *bbox,
        width_px,
        height_px,
        resolution_m: descriptor.resolution_m,
        crs: descriptor.crs,
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let bytes = service.fetch(bbox, width_px, height_px)?;
    let rgb = decode_rgb(&bytes, width_px, height_px)?;

    let (ulx, uly) = bbox.upper_left();
    let transform = GeoTransform::from_origin(ulx, uly, descriptor.resolution_m, descriptor.resolution_m);
    raster::write_rgb(dest, width_px, height_px, &rgb, &transform, &descriptor.crs)?;

    let mask_path = match mask {
        Some(mask) => {
            // pixel-centre sampling never leaves the tile, so no clipping is needed
            let burned = raster::rasterize(mask, &transform, width_px, height_px);
            let path = mask_path_for(dest);
            raster::write_mask(&path, width_px, height_px, &burned, &transform, &descriptor.crs)?;
            Some(path)
        }
        None => None,
    };

    let elapsed = start.elapsed().as_secs_f64();
    debug!("Wrote {} ({} bytes) in {:.2}s", dest.display(), bytes.len(), elapsed);

    Ok(Image::new(&footprint, dest.to_path_buf(), mask_path, elapsed))
}
