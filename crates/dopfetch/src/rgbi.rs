//! Four-band R, G, B, NIR composites from an RGB and a CIR service.
//!
//! Both products are downloaded over one shared grid into `rgb/` and `cir/`
//! below the output directory. Tile `i` of each is then merged into
//! `rgbi_i.tiff`; the near-infrared band is the first band of the CIR tile.

use crate::area::{tile_file_name, AreaDownloader};
use crate::dataset::{AreaDataset, Image, TileFootprint};
use crate::geometry::{Crs, GeoSeries};
use crate::raster::{self, GeoTransform, RasterData};
use crate::{DopError, Result};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info};

/// Downloads matching RGB and CIR tiles and merges them.
#[derive(Debug)]
pub struct RgbiDownloader {
    rgb: AreaDownloader,
    cir: AreaDownloader,
}

impl RgbiDownloader {
    /// Pair two downloaders; they must share spacing, resolution and CRS.
    pub fn new(rgb: AreaDownloader, cir: AreaDownloader) -> Result<Self> {
        if rgb.grid_spacing() != cir.grid_spacing() {
            return Err(DopError::BandMismatch(format!(
                "grid spacing {} m vs {} m",
                rgb.grid_spacing(),
                cir.grid_spacing()
            )));
        }
        if rgb.tile_px() != cir.tile_px() {
            return Err(DopError::BandMismatch(format!(
                "resolution {} m vs {} m",
                rgb.resolution_m(),
                cir.resolution_m()
            )));
        }
        if rgb.crs() != cir.crs() {
            return Err(DopError::BandMismatch(format!("CRS {} vs {}", rgb.crs(), cir.crs())));
        }
        Ok(Self { rgb, cir })
    }

    /// CRS shared by both products.
    pub fn crs(&self) -> Crs {
        self.rgb.crs()
    }

    /// Download both products for `area` and merge them tile by tile.
    ///
    /// A tile that failed in either product, or whose merge failed, is a
    /// failure placeholder in the result.
    pub fn download(
        &self,
        area_name: &str,
        area: &GeoSeries,
        out_path: &Path,
        buffer_size: u32,
        mask: Option<&GeoSeries>,
        prefix: Option<&str>,
    ) -> Result<AreaDataset> {
        let crs = self.rgb.crs();
        let polygon = area.single_area(&crs, "area_polygon")?;
        let mask = mask.map(|m| m.single_area(&crs, "mask")).transpose()?;

        let tiles = self.rgb.plan(&polygon, buffer_size, mask.as_ref())?;

        let rgb = self.rgb.download_prepared(
            &format!("{}_rgb", area_name),
            polygon.clone(),
            &out_path.join("rgb"),
            buffer_size,
            &tiles,
            mask.as_ref(),
            prefix,
        )?;
        let cir = self.cir.download_prepared(
            &format!("{}_cir", area_name),
            polygon.clone(),
            &out_path.join("cir"),
            buffer_size,
            &tiles,
            mask.as_ref(),
            prefix,
        )?;

        fs::create_dir_all(out_path)?;
        let merged_prefix = match prefix {
            Some(prefix) => format!("{}_rgbi", prefix),
            None => "rgbi".to_string(),
        };
        let extension = &self.rgb.options().file_extension;

        let rgb_images = rgb.images.unwrap_or_default();
        let cir_images = cir.images.unwrap_or_default();

        let images: Vec<Image> = tiles
            .iter()
            .zip(rgb_images.iter().zip(cir_images.iter()))
            .enumerate()
            .map(|(index, (tile, (rgb_image, cir_image)))| {
                let dest = out_path.join(tile_file_name(Some(&merged_prefix), index + 1, extension));
                let footprint = TileFootprint {
                    bbox: tile.bbox,
                    width_px: self.rgb.tile_px(),
                    height_px: self.rgb.tile_px(),
                    resolution_m: self.rgb.resolution_m(),
                    crs,
                };
                let band_time = rgb_image.download_time() + cir_image.download_time();
                if rgb_image.is_failed() || cir_image.is_failed() {
                    return Image::failed(&footprint, band_time);
                }

                let start = Instant::now();
                match merge_tile(rgb_image, cir_image, &dest) {
                    Ok(()) => Image::new(
                        &footprint,
                        dest,
                        rgb_image.mask_path().map(Path::to_path_buf),
                        band_time + start.elapsed().as_secs_f64(),
                    ),
                    Err(e) => {
                        error!("Merging tile {} failed: {}", index + 1, e);
                        Image::failed(&footprint, band_time + start.elapsed().as_secs_f64())
                    }
                }
            })
            .collect();

        let mut dataset = AreaDataset::new(area_name, polygon, buffer_size, out_path.to_path_buf(), crs);
        dataset.images = Some(images);
        info!(
            "'{}': merged {} RGBI tiles, {} failed",
            area_name,
            tiles.len(),
            dataset.failed_count()
        );
        Ok(dataset)
    }
}

fn read_band_source(image: &Image) -> Result<RasterData> {
    let path = image
        .image_path()
        .ok_or_else(|| DopError::InvalidRaster {
            path: String::new(),
            reason: "tile was not downloaded".to_string(),
        })?;
    let raster = raster::read_raster(path)?;
    if raster.bands < 3 {
        return Err(DopError::InvalidRaster {
            path: path.display().to_string(),
            reason: format!("expected 3 bands, found {}", raster.bands),
        });
    }
    Ok(raster)
}

/// Write R, G, B of `rgb` and band 1 of `cir` as a 4-band raster.
pub fn merge_tile(rgb: &Image, cir: &Image, dest: &Path) -> Result<()> {
    let rgb_raster = read_band_source(rgb)?;
    let cir_raster = read_band_source(cir)?;

    if (rgb_raster.width, rgb_raster.height) != (cir_raster.width, cir_raster.height) {
        return Err(DopError::BandMismatch(format!(
            "tile sizes {}x{} and {}x{}",
            rgb_raster.width, rgb_raster.height, cir_raster.width, cir_raster.height
        )));
    }

    let pixels = rgb_raster.width as usize * rgb_raster.height as usize;
    let mut rgbi = Vec::with_capacity(pixels * 4);
    for (rgb_px, cir_px) in rgb_raster
        .data
        .chunks_exact(rgb_raster.bands)
        .zip(cir_raster.data.chunks_exact(cir_raster.bands))
    {
        rgbi.extend_from_slice(&rgb_px[..3]);
        rgbi.push(cir_px[0]);
    }

    let (ulx, uly) = rgb.upper_left();
    let transform = rgb_raster
        .transform
        .unwrap_or_else(|| GeoTransform::from_origin(ulx, uly, rgb.resolution_m(), rgb.resolution_m()));

    raster::write_rgbi(dest, rgb_raster.width, rgb_raster.height, &rgbi, &transform, &rgb.crs())
}
