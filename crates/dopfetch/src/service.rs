//! WMS map service client.
//!
//! A [`ConnectionDescriptor`] describes one endpoint (URL, protocol version,
//! fixed resolution, layer, CRS, image format). [`WmsClient`] turns it into
//! GetMap requests; callers only ever see [`MapService::fetch`], so the
//! differences between WMS 1.1.1 and 1.3.0 stay inside this module.
//!
//! The client performs no retries. Every request is bounded by a timeout.

use crate::geometry::{BoundingBox, Crs};
use crate::{DopError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Placeholder for a credential in URL templates.
const SECRET_PLACEHOLDER: &str = "{secret}";

/// Text shown wherever a credential would appear.
const REDACTED: &str = "<secret>";

/// Query parameters a GetMap request sets itself.
const RESERVED_PARAMS: &[&str] = &[
    "SERVICE", "REQUEST", "VERSION", "LAYERS", "STYLES", "SRS", "CRS", "BBOX", "WIDTH",
    "HEIGHT", "FORMAT", "TRANSPARENT",
];

/// WMS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WmsVersion {
    /// WMS 1.1.1 (`SRS` parameter, x/y axis order).
    #[serde(rename = "1.1.1")]
    V1_1_1,
    /// WMS 1.3.0 (`CRS` parameter, axis order defined by the CRS).
    #[serde(rename = "1.3.0")]
    V1_3_0,
}

impl WmsVersion {
    /// Version string as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            WmsVersion::V1_1_1 => "1.1.1",
            WmsVersion::V1_3_0 => "1.3.0",
        }
    }
}

impl fmt::Display for WmsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image format requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    /// `image/png`
    #[serde(rename = "image/png")]
    Png,
    /// `image/jpeg`
    #[serde(rename = "image/jpeg")]
    Jpeg,
    /// `image/tiff`
    #[serde(rename = "image/tiff")]
    Tiff,
}

impl ImageFormat {
    /// MIME type.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Tiff => "image/tiff",
        }
    }
}

/// An opaque credential. Printed and serialized only as a placeholder.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a credential.
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

/// Everything needed to talk to one map service endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionDescriptor {
    /// Endpoint URL, possibly with a `{secret}` placeholder.
    #[serde(rename = "url", serialize_with = "serialize_redacted_url")]
    url: String,
    /// Protocol version.
    pub version: WmsVersion,
    /// Fixed ground resolution in meters per pixel.
    pub resolution_m: f64,
    /// Layer name.
    pub layer: String,
    /// CRS of requests and responses.
    pub crs: Crs,
    /// Image format requested.
    pub format: ImageFormat,
    /// Maximum width/height in pixels accepted per request.
    pub max_pixels: Option<u32>,
    /// Credential substituted into the URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<Secret>,
}

fn serialize_redacted_url<S: Serializer>(url: &str, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&url.replace(SECRET_PLACEHOLDER, REDACTED))
}

impl ConnectionDescriptor {
    /// Create a descriptor for a public endpoint.
    pub fn new(
        url: impl Into<String>,
        version: WmsVersion,
        resolution_m: f64,
        layer: impl Into<String>,
        crs: Crs,
        format: ImageFormat,
    ) -> Self {
        Self {
            url: url.into(),
            version,
            resolution_m,
            layer: layer.into(),
            crs,
            format,
            max_pixels: None,
            secret: None,
        }
    }

    /// Limit the request size to `max` pixels per side.
    pub fn with_max_pixels(mut self, max: u32) -> Self {
        self.max_pixels = Some(max);
        self
    }

    /// Attach a credential; `url` must contain the `{secret}` placeholder.
    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secret = Some(secret);
        self
    }

    /// URL safe for logs and manifests.
    pub fn redacted_url(&self) -> String {
        self.url.replace(SECRET_PLACEHOLDER, REDACTED)
    }

    /// URL with the credential filled in. Only used to build requests.
    fn resolved_url(&self) -> String {
        match &self.secret {
            Some(secret) => self.url.replace(SECRET_PLACEHOLDER, secret.expose()),
            None => self.url.clone(),
        }
    }

    /// Check a tile size against the service limit.
    pub fn validate_pixels(&self, width: u32, height: u32) -> Result<()> {
        match self.max_pixels {
            Some(max) if width > max || height > max => {
                Err(DopError::PixelLimitExceeded { width, height, max })
            }
            _ => Ok(()),
        }
    }

    /// Build the GetMap URL for a bounding box and pixel size.
    pub fn getmap_url(&self, bbox: &BoundingBox, width: u32, height: u32) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.resolved_url())
            .map_err(|e| DopError::ServiceException(format!("invalid service URL {}: {}", self.redacted_url(), e)))?;

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !RESERVED_PARAMS.contains(&key.to_ascii_uppercase().as_str()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        // WMS 1.3.0 follows the CRS axis order: lat/lon for geographic systems
        let bbox_value = if self.version == WmsVersion::V1_3_0 && self.crs.is_geographic() {
            format!("{},{},{},{}", bbox.min_y, bbox.min_x, bbox.max_y, bbox.max_x)
        } else {
            format!("{},{},{},{}", bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y)
        };
        let crs_key = match self.version {
            WmsVersion::V1_1_1 => "SRS",
            WmsVersion::V1_3_0 => "CRS",
        };

        {
            let mut query = url.query_pairs_mut();
            query.clear();
            for (key, value) in &kept {
                query.append_pair(key, value);
            }
            query
                .append_pair("SERVICE", "WMS")
                .append_pair("VERSION", self.version.as_str())
                .append_pair("REQUEST", "GetMap")
                .append_pair("LAYERS", &self.layer)
                .append_pair("STYLES", "")
                .append_pair(crs_key, &self.crs.to_string())
                .append_pair("BBOX", &bbox_value)
                .append_pair("WIDTH", &width.to_string())
                .append_pair("HEIGHT", &height.to_string())
                .append_pair("FORMAT", self.format.mime_type());
        }
        Ok(url)
    }
}

/// A source of map images for bounding boxes.
pub trait MapService: Send + Sync {
    /// The endpoint this service talks to.
    fn descriptor(&self) -> &ConnectionDescriptor;

    /// Fetch the raw encoded image for `bbox` at `width` x `height` pixels.
    fn fetch(&self, bbox: &BoundingBox, width: u32, height: u32) -> Result<Vec<u8>>;
}

/// Download statistics for a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Number of images downloaded this session.
    pub tiles_downloaded: usize,
    /// Total bytes downloaded this session.
    pub bytes_downloaded: u64,
}

/// Client options.
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Timeout applied to every request.
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Blocking HTTP client for one WMS endpoint.
pub struct WmsClient {
    descriptor: ConnectionDescriptor,
    client: reqwest::blocking::Client,
    tiles_downloaded: AtomicUsize,
    bytes_downloaded: AtomicU64,
}

impl fmt::Debug for WmsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WmsClient")
            .field("url", &self.descriptor.redacted_url())
            .field("layer", &self.descriptor.layer)
            .field("version", &self.descriptor.version)
            .finish()
    }
}

impl WmsClient {
    /// Create a client with default options.
    pub fn new(descriptor: ConnectionDescriptor) -> Result<Self> {
        Self::with_options(descriptor, ClientOptions::default())
    }

    /// Create a client with explicit options.
    pub fn with_options(descriptor: ConnectionDescriptor, options: ClientOptions) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(options.timeout)
            .build()?;

        Ok(Self {
            descriptor,
            client,
            tiles_downloaded: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
        })
    }

    /// Get download statistics for this session.
    pub fn download_stats(&self) -> DownloadStats {
        DownloadStats {
            tiles_downloaded: self.tiles_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }
}

impl MapService for WmsClient {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn fetch(&self, bbox: &BoundingBox, width: u32, height: u32) -> Result<Vec<u8>> {
        let url = self.descriptor.getmap_url(bbox, width, height)?;
        debug!(
            "GetMap {} layer={} bbox={:?} size={}x{}",
            self.descriptor.redacted_url(),
            self.descriptor.layer,
            bbox,
            width,
            height
        );

        // the request URL carries the credential, reqwest errors must not
        let response = self.client.get(url).send().map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(DopError::HttpStatus {
                status: response.status().as_u16(),
                url: self.descriptor.redacted_url(),
            });
        }

        let is_xml = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("xml"));

        let bytes = response.bytes().map_err(transport_error)?;

        if is_xml {
            return Err(DopError::ServiceException(service_exception_text(&bytes)));
        }

        self.tiles_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes.len() as u64, Ordering::Relaxed);

        Ok(bytes.to_vec())
    }
}

fn transport_error(e: reqwest::Error) -> DopError {
    DopError::Http(e.without_url())
}

/// Extract the message of an OGC ServiceException document.
fn service_exception_text(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    // the innermost opening tag before the first closing one
    if let Some(close) = text.find("</ServiceException>") {
        if let Some(start) = text[..close].rfind("<ServiceException") {
            if let Some(open) = text[start..close].find('>') {
                return text[start + open + 1..close].trim().to_string();
            }
        }
    }
    text.chars().take(200).collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ETRS89_UTM32, WGS84};

    fn descriptor(url: &str, version: WmsVersion) -> ConnectionDescriptor {
        ConnectionDescriptor::new(url, version, 0.2, "dop20", ETRS89_UTM32, ImageFormat::Tiff)
    }

    fn query(url: &reqwest::Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn param<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
        pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_getmap_111() {
        let d = descriptor("https://example.org/wms?", WmsVersion::V1_1_1);
        let bbox = BoundingBox::new(500000.0, 5400000.0, 501000.0, 5401000.0);
        let url = d.getmap_url(&bbox, 5000, 5000).unwrap();
        let pairs = query(&url);
        assert_eq!(param(&pairs, "SRS"), Some("EPSG:25832"));
        assert_eq!(param(&pairs, "CRS"), None);
        assert_eq!(param(&pairs, "VERSION"), Some("1.1.1"));
        assert_eq!(param(&pairs, "BBOX"), Some("500000,5400000,501000,5401000"));
        assert_eq!(param(&pairs, "WIDTH"), Some("5000"));
        assert_eq!(param(&pairs, "FORMAT"), Some("image/tiff"));
        assert_eq!(param(&pairs, "LAYERS"), Some("dop20"));
    }

    #[test]
    fn test_getmap_130_keeps_vendor_params() {
        let d = descriptor(
            "https://example.org/wms?language=ger&VERSION=1.1.1&layer=X",
            WmsVersion::V1_3_0,
        );
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let pairs = query(&d.getmap_url(&bbox, 50, 50).unwrap());
        assert_eq!(param(&pairs, "language"), Some("ger"));
        assert_eq!(param(&pairs, "layer"), Some("X"));
        assert_eq!(param(&pairs, "CRS"), Some("EPSG:25832"));
        let versions: Vec<_> = pairs.iter().filter(|(k, _)| k.eq_ignore_ascii_case("version")).collect();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].1, "1.3.0");
    }

    #[test]
    fn test_getmap_130_geographic_axis_order() {
        let d = ConnectionDescriptor::new(
            "https://example.org/wms",
            WmsVersion::V1_3_0,
            0.00001,
            "l",
            WGS84,
            ImageFormat::Png,
        );
        let bbox = BoundingBox::new(9.0, 48.0, 9.1, 48.1);
        let pairs = query(&d.getmap_url(&bbox, 10, 10).unwrap());
        assert_eq!(param(&pairs, "BBOX"), Some("48,9,48.1,9.1"));
    }

    #[test]
    fn test_secret_never_exposed() {
        let d = ConnectionDescriptor::new(
            "https://sg.example.de/wms_dop__{secret}?",
            WmsVersion::V1_1_1,
            0.2,
            "rgb",
            ETRS89_UTM32,
            ImageFormat::Tiff,
        )
        .with_secret(Secret::new("0123-abcd"));

        assert_eq!(d.redacted_url(), "https://sg.example.de/wms_dop__<secret>?");
        assert!(!format!("{:?}", d).contains("0123-abcd"));

        let json = serde_json::to_string(&d).unwrap();
        assert!(!json.contains("0123-abcd"));
        assert!(json.contains("<secret>"));

        let url = d
            .getmap_url(&BoundingBox::new(0.0, 0.0, 1.0, 1.0), 5, 5)
            .unwrap();
        assert!(url.as_str().contains("wms_dop__0123-abcd"));
    }

    #[test]
    fn test_transport_error_hides_secret() {
        let d = ConnectionDescriptor::new(
            "http://127.0.0.1:9/wms_dop__{secret}?",
            WmsVersion::V1_1_1,
            0.2,
            "rgb",
            ETRS89_UTM32,
            ImageFormat::Tiff,
        )
        .with_secret(Secret::new("TOPSECRET"));
        let client = WmsClient::with_options(
            d,
            ClientOptions {
                timeout: Duration::from_secs(2),
            },
        )
        .unwrap();

        let err = client
            .fetch(&BoundingBox::new(0.0, 0.0, 1.0, 1.0), 5, 5)
            .unwrap_err();
        assert!(matches!(err, DopError::Http(_)), "unexpected error {}", err);
        assert!(!err.to_string().contains("TOPSECRET"), "{}", err);
        assert!(!format!("{:?}", err).contains("TOPSECRET"));
    }

    #[test]
    fn test_pixel_limit() {
        let d = descriptor("https://example.org/wms", WmsVersion::V1_1_1).with_max_pixels(6000);
        assert!(d.validate_pixels(6000, 6000).is_ok());
        assert!(matches!(
            d.validate_pixels(6005, 6005),
            Err(DopError::PixelLimitExceeded { max: 6000, .. })
        ));
    }

    #[test]
    fn test_service_exception_text() {
        let body = br#"<?xml version="1.0"?><ServiceExceptionReport><ServiceException code="InvalidSRS">
            SRS not supported</ServiceException></ServiceExceptionReport>"#;
        assert_eq!(service_exception_text(body), "SRS not supported");
    }
}
