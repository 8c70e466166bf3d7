//! Error types for the orthophoto downloader.

use crate::catalog::{ImageKind, StateCode};
use thiserror::Error;

/// Broad classes of failure, used by callers to decide whether an error is
/// fatal for the whole run or local to one tile or state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid setup detected before any I/O happens.
    Configuration,
    /// Malformed or inconsistent input for a single call.
    Validation,
    /// Network, decoding or service failure while fetching a tile.
    Transport,
    /// Local file system or serialization failure.
    Io,
}

/// Errors that can occur while planning or downloading orthophotos.
#[derive(Debug, Error)]
pub enum DopError {
    /// Grid spacing is zero or not an integer multiple of the service resolution.
    #[error("Grid spacing {spacing} m is not a positive multiple of the service resolution {resolution} m")]
    InvalidGridSpacing {
        /// Requested grid spacing in meters.
        spacing: u32,
        /// Service resolution in meters per pixel.
        resolution: f64,
    },

    /// Requested tile size exceeds the per-request pixel limit of a service.
    #[error("Tile of {width}x{height} px exceeds the service limit of {max} px per side")]
    PixelLimitExceeded {
        /// Requested width in pixels.
        width: u32,
        /// Requested height in pixels.
        height: u32,
        /// Maximum pixels per side accepted by the service.
        max: u32,
    },

    /// No service profile is registered for a state and image kind.
    #[error("No {kind} service profile available for state {code}")]
    MissingProfile {
        /// State code.
        code: StateCode,
        /// Requested image kind.
        kind: ImageKind,
    },

    /// Unknown federal state code.
    #[error("Unknown state code: {0}")]
    UnknownStateCode(String),

    /// CRS identifier that cannot be parsed or has no projection definition.
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    /// Two downloaders that must share a grid disagree.
    #[error("Band mismatch: {0}")]
    BandMismatch(String),

    /// Geometry that cannot be used as an area of interest.
    #[error("Invalid geometry for '{argname}': {reason}")]
    InvalidGeometry {
        /// Name of the offending argument.
        argname: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A spatial series did not contain exactly one geometry.
    #[error("Expected exactly one geometry for '{argname}', got {count}")]
    GeometryCount {
        /// Name of the offending argument.
        argname: String,
        /// Number of geometries found.
        count: usize,
    },

    /// A spatial series carried no CRS.
    #[error("Missing CRS for '{0}'")]
    MissingCrs(String),

    /// A spatial series is in a different CRS than the service.
    #[error("CRS of '{argname}' ({found}) does not match the service CRS ({expected})")]
    CrsMismatch {
        /// Name of the offending argument.
        argname: String,
        /// CRS found on the input.
        found: String,
        /// CRS expected by the service.
        expected: String,
    },

    /// The requested area does not touch any known state.
    #[error("No federal states intersect with the given area")]
    NoIntersectingStates,

    /// A dataset without images was asked to serialize itself.
    #[error("Cannot serialize dataset '{0}' without images")]
    MissingImages(String),

    /// HTTP request error.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status from a map service.
    #[error("Map service returned HTTP {status} for {url}")]
    HttpStatus {
        /// Status code.
        status: u16,
        /// Request URL with any secret redacted.
        url: String,
    },

    /// The map service answered with an OGC service exception.
    #[error("Service exception: {0}")]
    ServiceException(String),

    /// Decoded image does not have the requested size.
    #[error("Expected a {expected_width}x{expected_height} image, got {width}x{height}")]
    UnexpectedImageSize {
        /// Requested width.
        expected_width: u32,
        /// Requested height.
        expected_height: u32,
        /// Decoded width.
        width: u32,
        /// Decoded height.
        height: u32,
    },

    /// Image decoding error.
    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// TIFF encoding or decoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Raster file with an unexpected layout.
    #[error("Invalid raster {path}: {reason}")]
    InvalidRaster {
        /// File that was read.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Coordinate transformation failure.
    #[error("Projection error: {0}")]
    Projection(String),

    /// GeoJSON parsing or conversion error.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DopError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DopError::InvalidGridSpacing { .. }
            | DopError::PixelLimitExceeded { .. }
            | DopError::MissingProfile { .. }
            | DopError::UnknownStateCode(_)
            | DopError::UnsupportedCrs(_)
            | DopError::BandMismatch(_) => ErrorKind::Configuration,
            DopError::InvalidGeometry { .. }
            | DopError::GeometryCount { .. }
            | DopError::MissingCrs(_)
            | DopError::CrsMismatch { .. }
            | DopError::NoIntersectingStates
            | DopError::MissingImages(_) => ErrorKind::Validation,
            DopError::Http(_)
            | DopError::HttpStatus { .. }
            | DopError::ServiceException(_)
            | DopError::UnexpectedImageSize { .. }
            | DopError::ImageDecode(_)
            | DopError::Projection(_) => ErrorKind::Transport,
            DopError::Tiff(_)
            | DopError::InvalidRaster { .. }
            | DopError::GeoJson(_)
            | DopError::Json(_)
            | DopError::Io(_) => ErrorKind::Io,
        }
    }

    /// True for errors that must abort a run before any download starts.
    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    pub(crate) fn invalid_geometry(argname: &str, reason: impl Into<String>) -> Self {
        DopError::InvalidGeometry {
            argname: argname.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = DopError::InvalidGridSpacing {
            spacing: 1001,
            resolution: 0.4,
        };
        assert!(err.is_configuration());

        let err = DopError::MissingProfile {
            code: StateCode::NI,
            kind: ImageKind::Cir,
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "No CIR service profile available for state NI");

        assert_eq!(DopError::NoIntersectingStates.kind(), ErrorKind::Validation);
        assert_eq!(
            DopError::ServiceException("LayerNotDefined".into()).kind(),
            ErrorKind::Transport
        );
    }
}
