//! Coordinate reference systems, bounding boxes and area-of-interest inputs.
//!
//! Reprojection is pure Rust (`proj4rs` with the `crs-definitions` EPSG
//! database), so no system PROJ installation is needed.

use crate::{DopError, Result};
use geo::{BoundingRect, Coord, Geometry, MapCoords, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The working CRS of all German DOP services (ETRS89 / UTM zone 32N).
pub const ETRS89_UTM32: Crs = Crs(25832);

/// WGS 84 geographic coordinates, the native CRS of GeoJSON.
pub const WGS84: Crs = Crs(4326);

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs(u32);

impl Crs {
    /// Create a CRS from an EPSG code.
    pub const fn epsg(code: u32) -> Self {
        Crs(code)
    }

    /// The EPSG code.
    pub fn code(&self) -> u32 {
        self.0
    }

    /// PROJ.4 definition from the EPSG database.
    pub fn proj_string(&self) -> Option<&'static str> {
        u16::try_from(self.0)
            .ok()
            .and_then(crs_definitions::from_code)
            .map(|def| def.proj4)
    }

    /// Whether coordinates are longitude/latitude in degrees.
    pub fn is_geographic(&self) -> bool {
        match self.proj_string() {
            Some(proj) => proj.contains("+proj=longlat"),
            None => (4000..5000).contains(&self.0),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl FromStr for Crs {
    type Err = DopError;

    /// Parse `EPSG:25832`, `epsg:25832` or a bare `25832`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let code = match trimmed.split_once(':') {
            Some((authority, code)) if authority.eq_ignore_ascii_case("epsg") => code,
            Some(_) => return Err(DopError::UnsupportedCrs(s.to_string())),
            None => trimmed,
        };
        code.trim()
            .parse::<u32>()
            .map(Crs)
            .map_err(|_| DopError::UnsupportedCrs(s.to_string()))
    }
}

impl TryFrom<String> for Crs {
    type Error = DopError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

/// Axis-aligned rectangle `(min_x, min_y, max_x, max_y)` in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// West edge.
    pub min_x: f64,
    /// South edge.
    pub min_y: f64,
    /// East edge.
    pub max_x: f64,
    /// North edge.
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a bounding box from its edges.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Width in CRS units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height in CRS units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// The top-left corner `(min_x, max_y)`, the anchor of north-up rasters.
    pub fn upper_left(&self) -> (f64, f64) {
        (self.min_x, self.max_y)
    }

    /// Grow the box by `distance` on every side.
    pub fn expand(&self, distance: f64) -> Self {
        Self::new(
            self.min_x - distance,
            self.min_y - distance,
            self.max_x + distance,
            self.max_y + distance,
        )
    }

    /// The box as a closed polygon.
    pub fn to_polygon(&self) -> Polygon<f64> {
        self.to_rect().to_polygon()
    }

    /// The box as a `geo` rectangle.
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.min_x,
                y: self.min_y,
            },
            Coord {
                x: self.max_x,
                y: self.max_y,
            },
        )
    }

    /// Bounding box of a `geo` rectangle.
    pub fn from_rect(rect: Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    /// Bounding box of a multipolygon, `None` when it is empty.
    pub fn of(area: &MultiPolygon<f64>) -> Option<Self> {
        area.bounding_rect().map(Self::from_rect)
    }
}

/// Convert any areal geometry to a multipolygon.
///
/// Returns a validation error for points, lines and collections.
pub fn to_multi_polygon(geometry: &Geometry<f64>, argname: &str) -> Result<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Ok(mp.clone()),
        Geometry::Rect(r) => Ok(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Ok(MultiPolygon::new(vec![t.to_polygon()])),
        other => Err(DopError::invalid_geometry(
            argname,
            format!("expected a polygon, got {}", geometry_type_name(other)),
        )),
    }
}

fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// A sequence of geometries sharing one CRS.
///
/// The downloaders accept areas and masks only as a series holding exactly
/// one geometry with an explicit CRS, so that CRS mix-ups are caught before
/// any tile is requested.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoSeries {
    /// The geometries.
    pub geometries: Vec<Geometry<f64>>,
    /// Their CRS, if known.
    pub crs: Option<Crs>,
}

impl GeoSeries {
    /// Create a series.
    pub fn new(geometries: Vec<Geometry<f64>>, crs: Option<Crs>) -> Self {
        Self { geometries, crs }
    }

    /// A series holding one geometry in a known CRS.
    pub fn single(geometry: impl Into<Geometry<f64>>, crs: Crs) -> Self {
        Self::new(vec![geometry.into()], Some(crs))
    }

    /// Number of geometries.
    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    /// Whether the series is empty.
    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    /// Validate that this series holds exactly one areal geometry in
    /// `expected` CRS and return it.
    pub fn single_area(&self, expected: &Crs, argname: &str) -> Result<MultiPolygon<f64>> {
        if self.geometries.len() != 1 {
            return Err(DopError::GeometryCount {
                argname: argname.to_string(),
                count: self.geometries.len(),
            });
        }
        let crs = self
            .crs
            .ok_or_else(|| DopError::MissingCrs(argname.to_string()))?;
        if crs != *expected {
            return Err(DopError::CrsMismatch {
                argname: argname.to_string(),
                found: crs.to_string(),
                expected: expected.to_string(),
            });
        }
        to_multi_polygon(&self.geometries[0], argname)
    }

    /// Union of all areal geometries, reprojected to `target`.
    pub fn union_in(&self, target: &Crs, argname: &str) -> Result<MultiPolygon<f64>> {
        use geo::BooleanOps;

        let crs = self
            .crs
            .ok_or_else(|| DopError::MissingCrs(argname.to_string()))?;
        let mut merged = MultiPolygon::new(Vec::new());
        for geometry in &self.geometries {
            let area = to_multi_polygon(geometry, argname)?;
            merged = if merged.0.is_empty() {
                area
            } else {
                merged.union(&area)
            };
        }
        reproject(&merged, &crs, target)
    }
}

/// An area of interest handed to the multi-state coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum AreaOfInterest {
    /// A bare polygon, interpreted in [`ETRS89_UTM32`].
    Polygon(MultiPolygon<f64>),
    /// A spatial series with its own CRS; all members are unioned.
    Series(GeoSeries),
}

impl AreaOfInterest {
    /// The area as one multipolygon in `target` CRS.
    pub fn to_area(&self, target: &Crs) -> Result<MultiPolygon<f64>> {
        match self {
            AreaOfInterest::Polygon(area) => reproject(area, &ETRS89_UTM32, target),
            AreaOfInterest::Series(series) => series.union_in(target, "area_polygon"),
        }
    }
}

impl From<Polygon<f64>> for AreaOfInterest {
    fn from(polygon: Polygon<f64>) -> Self {
        AreaOfInterest::Polygon(MultiPolygon::new(vec![polygon]))
    }
}

impl From<MultiPolygon<f64>> for AreaOfInterest {
    fn from(area: MultiPolygon<f64>) -> Self {
        AreaOfInterest::Polygon(area)
    }
}

impl From<GeoSeries> for AreaOfInterest {
    fn from(series: GeoSeries) -> Self {
        AreaOfInterest::Series(series)
    }
}

/// Reproject a multipolygon between two EPSG coordinate systems.
pub fn reproject(area: &MultiPolygon<f64>, from: &Crs, to: &Crs) -> Result<MultiPolygon<f64>> {
    use proj4rs::proj::Proj;

    if from == to {
        return Ok(area.clone());
    }

    let source_def = from
        .proj_string()
        .ok_or_else(|| DopError::UnsupportedCrs(from.to_string()))?;
    let target_def = to
        .proj_string()
        .ok_or_else(|| DopError::UnsupportedCrs(to.to_string()))?;
    let source = Proj::from_proj_string(source_def)
        .map_err(|e| DopError::Projection(format!("invalid projection {}: {:?}", from, e)))?;
    let target = Proj::from_proj_string(target_def)
        .map_err(|e| DopError::Projection(format!("invalid projection {}: {:?}", to, e)))?;

    let source_geographic = from.is_geographic();
    let target_geographic = to.is_geographic();
    let (source, target) = (&source, &target);

    area.try_map_coords(|c| {
        // proj4rs works in radians for geographic systems
        let mut point = if source_geographic {
            (c.x.to_radians(), c.y.to_radians(), 0.0)
        } else {
            (c.x, c.y, 0.0)
        };
        proj4rs::transform::transform(source, target, &mut point)
            .map_err(|e| DopError::Projection(format!("{} -> {} failed: {:?}", from, to, e)))?;
        Ok(if target_geographic {
            Coord {
                x: point.0.to_degrees(),
                y: point.1.to_degrees(),
            }
        } else {
            Coord {
                x: point.0,
                y: point.1,
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use geo::{point, polygon};

    #[test]
    fn test_crs_parse() {
        assert_eq!("EPSG:25832".parse::<Crs>().unwrap(), ETRS89_UTM32);
        assert_eq!("epsg:4326".parse::<Crs>().unwrap(), WGS84);
        assert_eq!("25833".parse::<Crs>().unwrap().code(), 25833);
        assert!("OGC:CRS84".parse::<Crs>().is_err());
        assert!("EPSG:abc".parse::<Crs>().is_err());
        assert_eq!(ETRS89_UTM32.to_string(), "EPSG:25832");
    }

    #[test]
    fn test_crs_geographic() {
        assert!(WGS84.is_geographic());
        assert!(!ETRS89_UTM32.is_geographic());
    }

    #[test]
    fn test_bounding_box() {
        let bbox = BoundingBox::new(1000.0, 2000.0, 3000.0, 5000.0);
        assert_eq!(bbox.width(), 2000.0);
        assert_eq!(bbox.height(), 3000.0);
        assert_eq!(bbox.upper_left(), (1000.0, 5000.0));
        let grown = bbox.expand(10.0);
        assert_eq!(grown.min_x, 990.0);
        assert_eq!(grown.max_y, 5010.0);
    }

    #[test]
    fn test_single_area_validation() {
        let square = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)];

        let ok = GeoSeries::single(square.clone(), ETRS89_UTM32);
        assert_eq!(ok.single_area(&ETRS89_UTM32, "area").unwrap().0.len(), 1);

        let wrong_crs = GeoSeries::single(square.clone(), WGS84);
        assert!(matches!(
            wrong_crs.single_area(&ETRS89_UTM32, "area"),
            Err(DopError::CrsMismatch { .. })
        ));

        let no_crs = GeoSeries::new(vec![square.clone().into()], None);
        assert!(matches!(
            no_crs.single_area(&ETRS89_UTM32, "area"),
            Err(DopError::MissingCrs(_))
        ));

        let two = GeoSeries::new(vec![square.clone().into(), square.into()], Some(ETRS89_UTM32));
        assert!(matches!(
            two.single_area(&ETRS89_UTM32, "area"),
            Err(DopError::GeometryCount { count: 2, .. })
        ));

        let point = GeoSeries::single(point!(x: 1.0, y: 1.0), ETRS89_UTM32);
        assert!(matches!(
            point.single_area(&ETRS89_UTM32, "mask"),
            Err(DopError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_reproject_roundtrip_utm() {
        // Stuttgart, roughly
        let area = MultiPolygon::new(vec![polygon![
            (x: 9.17, y: 48.77),
            (x: 9.19, y: 48.77),
            (x: 9.19, y: 48.79),
            (x: 9.17, y: 48.79),
        ]]);
        let utm = reproject(&area, &WGS84, &ETRS89_UTM32).unwrap();
        let first = utm.0[0].exterior().0[0];
        assert!(first.x > 500_000.0 && first.x < 520_000.0, "easting {}", first.x);
        assert!(first.y > 5_400_000.0 && first.y < 5_410_000.0, "northing {}", first.y);

        let back = reproject(&utm, &ETRS89_UTM32, &WGS84).unwrap();
        let c = back.0[0].exterior().0[0];
        assert_abs_diff_eq!(c.x, 9.17, epsilon = 1e-6);
        assert_abs_diff_eq!(c.y, 48.77, epsilon = 1e-6);
    }

    #[test]
    fn test_reproject_same_crs_is_identity() {
        let area = MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)]]);
        assert_eq!(reproject(&area, &ETRS89_UTM32, &ETRS89_UTM32).unwrap(), area);
    }
}
