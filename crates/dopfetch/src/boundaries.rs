//! State boundary geometries.

use crate::catalog::StateCode;
use crate::geometry::{reproject, to_multi_polygon, Crs, WGS84};
use crate::service::DEFAULT_TIMEOUT;
use crate::{DopError, Result};
use geo::MultiPolygon;
use std::path::PathBuf;
use tracing::{info, warn};

/// Low-resolution state outlines of the deutschlandGeoJSON project.
pub const DEFAULT_BOUNDARIES_URL: &str =
    "https://raw.githubusercontent.com/isellsoap/deutschlandGeoJSON/main/2_bundeslaender/4_niedrig.geo.json";

/// One federal state with its outline.
#[derive(Debug, Clone, PartialEq)]
pub struct Jurisdiction {
    /// Display name, e.g. `Bayern`.
    pub name: String,
    /// Two-letter code.
    pub code: StateCode,
    /// Outline in the CRS it was loaded into.
    pub geometry: MultiPolygon<f64>,
}

/// Read-only provider of state outlines.
pub trait BoundarySource: Send + Sync {
    /// Load all states, in the source's order, reprojected to `target`.
    fn load(&self, target: &Crs) -> Result<Vec<Jurisdiction>>;
}

/// Where a GeoJSON boundary file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryLocation {
    /// Fetched over HTTP.
    Url(String),
    /// Read from disk.
    File(PathBuf),
}

impl BoundaryLocation {
    /// `http(s)://` strings are URLs, everything else a path.
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            BoundaryLocation::Url(location.to_string())
        } else {
            BoundaryLocation::File(PathBuf::from(location))
        }
    }
}

/// Boundaries from a GeoJSON FeatureCollection whose features carry `name`
/// and `id` (`"DE-BY"`) properties.
#[derive(Debug, Clone)]
pub struct GeoJsonBoundaries {
    location: BoundaryLocation,
    crs: Crs,
}

impl Default for GeoJsonBoundaries {
    fn default() -> Self {
        Self::new(BoundaryLocation::Url(DEFAULT_BOUNDARIES_URL.to_string()))
    }
}

impl GeoJsonBoundaries {
    /// Boundaries in WGS 84, as GeoJSON prescribes.
    pub fn new(location: BoundaryLocation) -> Self {
        Self { location, crs: WGS84 }
    }

    /// Override the CRS of the file's coordinates.
    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = crs;
        self
    }

    fn read(&self) -> Result<String> {
        match &self.location {
            BoundaryLocation::File(path) => Ok(std::fs::read_to_string(path)?),
            BoundaryLocation::Url(url) => {
                info!("Fetching state boundaries from {}", url);
                let client = reqwest::blocking::Client::builder()
                    .timeout(DEFAULT_TIMEOUT)
                    .build()?;
                let response = client.get(url).send()?;
                if !response.status().is_success() {
                    return Err(DopError::HttpStatus {
                        status: response.status().as_u16(),
                        url: url.clone(),
                    });
                }
                Ok(response.text()?)
            }
        }
    }

    /// Parse a FeatureCollection into jurisdictions in `target` CRS.
    pub fn parse(&self, text: &str, target: &Crs) -> Result<Vec<Jurisdiction>> {
        let collection = match text.parse::<geojson::GeoJson>()? {
            geojson::GeoJson::FeatureCollection(collection) => collection,
            _ => {
                return Err(DopError::invalid_geometry(
                    "boundaries",
                    "expected a FeatureCollection",
                ))
            }
        };

        let mut states = Vec::with_capacity(collection.features.len());
        for feature in collection.features {
            let name = feature
                .property("name")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let id = feature
                .property("id")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let (Some(name), Some(id)) = (name, id) else {
                warn!("Skipping boundary feature without name or id");
                continue;
            };
            let code = match StateCode::from_boundary_id(&id) {
                Ok(code) => code,
                Err(e) => {
                    warn!("Skipping boundary '{}': {}", name, e);
                    continue;
                }
            };
            let Some(geometry) = feature.geometry else {
                warn!("Skipping boundary '{}' without geometry", name);
                continue;
            };

            let geometry = geo::Geometry::<f64>::try_from(geometry)?;
            let outline = to_multi_polygon(&geometry, "boundaries")?;
            states.push(Jurisdiction {
                name,
                code,
                geometry: reproject(&outline, &self.crs, target)?,
            });
        }

        info!("Loaded {} state boundaries", states.len());
        Ok(states)
    }
}

impl BoundarySource for GeoJsonBoundaries {
    fn load(&self, target: &Crs) -> Result<Vec<Jurisdiction>> {
        let text = self.read()?;
        self.parse(&text, target)
    }
}

/// Fixed outlines, for offline use and tests.
#[derive(Debug, Clone)]
pub struct StaticBoundaries {
    states: Vec<Jurisdiction>,
    crs: Crs,
}

impl StaticBoundaries {
    /// Outlines given in `crs`.
    pub fn new(states: Vec<Jurisdiction>, crs: Crs) -> Self {
        Self { states, crs }
    }
}

impl BoundarySource for StaticBoundaries {
    fn load(&self, target: &Crs) -> Result<Vec<Jurisdiction>> {
        self.states
            .iter()
            .map(|state| {
                Ok(Jurisdiction {
                    name: state.name.clone(),
                    code: state.code,
                    geometry: reproject(&state.geometry, &self.crs, target)?,
                })
            })
            .collect()
    }
}
