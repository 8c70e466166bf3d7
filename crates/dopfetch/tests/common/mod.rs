//! Shared helpers: an in-process map service that renders solid PNG tiles.

#![allow(dead_code)]

use dopfetch::{BoundingBox, ConnectionDescriptor, DopError, ImageFormat, MapService, Result, WmsVersion, ETRS89_UTM32};
use geo::MultiPolygon;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Resolution of the fake services: 1000 m tiles are 100 px wide.
pub const FAKE_RESOLUTION: f64 = 10.0;

pub fn fake_descriptor(layer: &str) -> ConnectionDescriptor {
    ConnectionDescriptor::new(
        "https://fake.invalid/wms?",
        WmsVersion::V1_1_1,
        FAKE_RESOLUTION,
        layer,
        ETRS89_UTM32,
        ImageFormat::Png,
    )
}

/// Serves solid-colour PNGs and fails for selected tile extents.
pub struct FakeService {
    descriptor: ConnectionDescriptor,
    color: [u8; 3],
    failing: Mutex<Vec<BoundingBox>>,
    calls: AtomicUsize,
}

impl FakeService {
    pub fn new(descriptor: ConnectionDescriptor, color: [u8; 3]) -> Self {
        Self {
            descriptor,
            color,
            failing: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rgb(color: [u8; 3]) -> Self {
        Self::new(fake_descriptor("fake_rgb"), color)
    }

    /// Make every request for `bbox` fail.
    pub fn fail_on(&self, bbox: BoundingBox) {
        self.failing.lock().unwrap().push(bbox);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MapService for FakeService {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn fetch(&self, bbox: &BoundingBox, width: u32, height: u32) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(bbox) {
            return Err(DopError::HttpStatus {
                status: 503,
                url: self.descriptor.redacted_url(),
            });
        }
        let image = image::RgbImage::from_pixel(width, height, image::Rgb(self.color));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, image::ImageFormat::Png)?;
        Ok(bytes.into_inner())
    }
}

pub fn square(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![BoundingBox::new(min_x, min_y, max_x, max_y).to_polygon()])
}
