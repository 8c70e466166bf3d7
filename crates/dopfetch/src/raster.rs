//! GeoTIFF output and mask rasterization.
//!
//! Georeferencing is carried by the three baseline GeoTIFF tags:
//! ModelPixelScale (33550), ModelTiepoint (33922) and GeoKeyDirectory (34735).
//! Rasters are always north-up with square pixels.

use crate::geometry::Crs;
use crate::{DopError, Result};
use geo::MultiPolygon;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tiff::ColorType;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// North-up affine transform from pixel to world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// World x of the upper-left corner of pixel (0, 0).
    pub origin_x: f64,
    /// World y of the upper-left corner of pixel (0, 0).
    pub origin_y: f64,
    /// Pixel width in world units.
    pub pixel_width: f64,
    /// Pixel height in world units (positive; rows run southwards).
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Transform anchored at the upper-left corner `(x, y)`.
    pub fn from_origin(x: f64, y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x: x,
            origin_y: y,
            pixel_width,
            pixel_height,
        }
    }

    /// World coordinates of the centre of pixel `(col, row)`.
    pub fn pixel_center(&self, col: u32, row: u32) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y - (row as f64 + 0.5) * self.pixel_height,
        )
    }
}

/// A decoded 8-bit raster with its georeferencing.
#[derive(Debug, Clone)]
pub struct RasterData {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Number of interleaved bands.
    pub bands: usize,
    /// Pixel-interleaved samples, row-major.
    pub data: Vec<u8>,
    /// Transform, if the file carries one.
    pub transform: Option<GeoTransform>,
    /// CRS, if the file carries an EPSG code.
    pub crs: Option<Crs>,
}

fn geo_keys(crs: &Crs) -> Result<Vec<u16>> {
    let code = u16::try_from(crs.code()).map_err(|_| DopError::UnsupportedCrs(crs.to_string()))?;
    let (model, key) = if crs.is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE)
    };
    // Header: version 1, revision 1.0, three keys; keys sorted by id
    Ok(vec![
        1, 1, 0, 3,
        GT_MODEL_TYPE, 0, 1, model,
        GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        key, 0, 1, code,
    ])
}

fn check_len(path: &Path, data: &[u8], width: u32, height: u32, bands: usize) -> Result<()> {
    let expected = width as usize * height as usize * bands;
    if data.len() != expected {
        return Err(DopError::InvalidRaster {
            path: path.display().to_string(),
            reason: format!("expected {} samples, got {}", expected, data.len()),
        });
    }
    Ok(())
}

macro_rules! write_geotiff {
    ($path:expr, $color:ty, $width:expr, $height:expr, $data:expr, $transform:expr, $crs:expr) => {{
        let keys = geo_keys($crs)?;
        let file = BufWriter::new(File::create($path)?);
        let mut encoder = TiffEncoder::new(file)?;
        let mut image = encoder.new_image::<$color>($width, $height)?;
        let t: &GeoTransform = $transform;
        image
            .encoder()
            .write_tag(tag(MODEL_PIXEL_SCALE), &[t.pixel_width, t.pixel_height, 0.0][..])?;
        image.encoder().write_tag(
            tag(MODEL_TIEPOINT),
            &[0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0][..],
        )?;
        image.encoder().write_tag(tag(GEO_KEY_DIRECTORY), &keys[..])?;
        image.write_data($data)?;
        Ok(())
    }};
}

/// Write a 3-band RGB GeoTIFF.
pub fn write_rgb(path: &Path, width: u32, height: u32, rgb: &[u8], transform: &GeoTransform, crs: &Crs) -> Result<()> {
    check_len(path, rgb, width, height, 3)?;
    write_geotiff!(path, colortype::RGB8, width, height, rgb, transform, crs)
}

/// Write a single-band mask GeoTIFF holding 0 and 1.
pub fn write_mask(path: &Path, width: u32, height: u32, mask: &[u8], transform: &GeoTransform, crs: &Crs) -> Result<()> {
    check_len(path, mask, width, height, 1)?;
    write_geotiff!(path, colortype::Gray8, width, height, mask, transform, crs)
}

/// Write a 4-band R, G, B, NIR GeoTIFF.
pub fn write_rgbi(path: &Path, width: u32, height: u32, rgbi: &[u8], transform: &GeoTransform, crs: &Crs) -> Result<()> {
    check_len(path, rgbi, width, height, 4)?;
    write_geotiff!(path, colortype::RGBA8, width, height, rgbi, transform, crs)
}

/// Read an 8-bit GeoTIFF written by this module (or any 8-bit GeoTIFF).
pub fn read_raster(path: &Path) -> Result<RasterData> {
    let invalid = |reason: String| DopError::InvalidRaster {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(path)?;
    let mut decoder = Decoder::new(std::io::BufReader::new(file))?;
    let (width, height) = decoder.dimensions()?;

    let bands = match decoder.colortype()? {
        ColorType::Gray(8) => 1,
        ColorType::GrayA(8) => 2,
        ColorType::RGB(8) => 3,
        ColorType::RGBA(8) => 4,
        other => return Err(invalid(format!("unsupported color type {:?}", other))),
    };

    let transform = match (
        decoder.get_tag_f64_vec(tag(MODEL_TIEPOINT)),
        decoder.get_tag_f64_vec(tag(MODEL_PIXEL_SCALE)),
    ) {
        (Ok(tie), Ok(scale)) if tie.len() >= 6 && scale.len() >= 2 => {
            Some(GeoTransform::from_origin(tie[3], tie[4], scale[0], scale[1]))
        }
        _ => None,
    };

    let crs = decoder
        .get_tag_u32_vec(tag(GEO_KEY_DIRECTORY))
        .ok()
        .and_then(|keys| epsg_from_keys(&keys));

    let data = match decoder.read_image()? {
        DecodingResult::U8(data) => data,
        _ => return Err(invalid("expected 8-bit samples".to_string())),
    };

    Ok(RasterData {
        width,
        height,
        bands,
        data,
        transform,
        crs,
    })
}

fn epsg_from_keys(keys: &[u32]) -> Option<Crs> {
    let count = *keys.get(3)? as usize;
    keys.get(4..4 + count * 4)?
        .chunks_exact(4)
        .find(|entry| entry[0] == PROJECTED_CS_TYPE as u32 || entry[0] == GEOGRAPHIC_TYPE as u32)
        .map(|entry| Crs::epsg(entry[3]))
}

/// Burn `area` into a `width` x `height` grid: 1 where the pixel centre lies
/// inside, 0 elsewhere. Holes and multiple parts follow the even-odd rule.
pub fn rasterize(area: &MultiPolygon<f64>, transform: &GeoTransform, width: u32, height: u32) -> Vec<u8> {
    let mut out = vec![0u8; width as usize * height as usize];

    let edges: Vec<((f64, f64), (f64, f64))> = area
        .0
        .iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .flat_map(|ring| ring.lines().map(|l| ((l.start.x, l.start.y), (l.end.x, l.end.y))))
        .collect();

    let mut crossings = Vec::new();
    for row in 0..height {
        let (_, y) = transform.pixel_center(0, row);

        crossings.clear();
        for &((x0, y0), (x1, y1)) in &edges {
            // half-open rule so shared vertices count once
            if (y0 <= y) != (y1 <= y) {
                crossings.push(x0 + (y - y0) * (x1 - x0) / (y1 - y0));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        let row_start = row as usize * width as usize;
        for span in crossings.chunks_exact(2) {
            // pixel centres inside [span[0], span[1])
            let first = ((span[0] - transform.origin_x) / transform.pixel_width - 0.5).ceil();
            let last = ((span[1] - transform.origin_x) / transform.pixel_width - 0.5).ceil() - 1.0;
            let first = first.max(0.0) as usize;
            let last = last.min(width as f64 - 1.0);
            if last < 0.0 {
                continue;
            }
            for col in first..=(last as usize) {
                out[row_start + col] = 1;
            }
        }
    }

    out
}
