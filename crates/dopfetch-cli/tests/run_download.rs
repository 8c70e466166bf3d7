use dopfetch::{
    delete_images, read_manifest, AreaOfInterest, AutoDownloader, BoundingBox, Catalog, ConnectionDescriptor, DopError,
    ImageFormat, ImageKind, Jurisdiction, MapService, StateCode, StaticBoundaries, WmsVersion, ETRS89_UTM32,
};
use dopfetch_cli::{run_download, AreaInput, DownloadConfig, MANIFEST_FILE_NAME};
use geo::MultiPolygon;
use std::io::Cursor;
use std::sync::Arc;

struct SolidService(ConnectionDescriptor);

impl MapService for SolidService {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.0
    }

    fn fetch(&self, _bbox: &BoundingBox, width: u32, height: u32) -> dopfetch::Result<Vec<u8>> {
        let image = image::RgbImage::from_pixel(width, height, image::Rgb([50, 100, 150]));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, image::ImageFormat::Png)?;
        Ok(bytes.into_inner())
    }
}

fn descriptor(layer: &str) -> ConnectionDescriptor {
    ConnectionDescriptor::new("https://fake.invalid/wms", WmsVersion::V1_1_1, 10.0, layer, ETRS89_UTM32, ImageFormat::Png)
}

fn jurisdiction(name: &str, code: StateCode, min_x: f64, max_x: f64) -> Jurisdiction {
    Jurisdiction {
        name: name.to_string(),
        code,
        geometry: MultiPolygon::new(vec![BoundingBox::new(min_x, 0.0, max_x, 10_000.0).to_polygon()]),
    }
}

fn downloader(config: &DownloadConfig) -> AutoDownloader {
    let mut catalog = Catalog::new();
    catalog.insert(StateCode::TH, ImageKind::Rgb, descriptor("th"));
    catalog.insert(StateCode::SN, ImageKind::Rgb, descriptor("unreachable"));

    let states = vec![
        jurisdiction("Thüringen", StateCode::TH, 0.0, 5_000.0),
        jurisdiction("Sachsen", StateCode::SN, 5_000.0, 10_000.0),
    ];
    AutoDownloader::new(config.grid_spacing, catalog, Box::new(StaticBoundaries::new(states, ETRS89_UTM32)))
        .with_options(config.downloader_options())
        .with_client_factory(Box::new(|descriptor: &ConnectionDescriptor| {
            if descriptor.layer == "unreachable" {
                return Err(DopError::ServiceException("connection refused".to_string()));
            }
            Ok(Arc::new(SolidService(descriptor.clone())) as Arc<dyn MapService>)
        }))
}

#[test]
fn test_download_writes_manifests_and_reports_dropped_states() {
    let dir = tempfile::tempdir().unwrap();
    let config = DownloadConfig::from_yaml(&format!(
        "grid_spacing: 1000\nfilename_prefix: town\nout_path: {}\n",
        dir.path().display()
    ))
    .unwrap();

    let area: AreaOfInterest = AreaInput::Bounds([3_000.0, 1_000.0, 6_000.0, 2_000.0])
        .load(config.area_crs)
        .unwrap();
    let summary = run_download(&downloader(&config), &config, "town", &area, None).unwrap();

    assert_eq!(summary.states.len(), 1);
    assert_eq!(summary.dropped, vec!["Sachsen".to_string()]);

    let thuringia = &summary.states[0];
    assert_eq!(thuringia.name, "Thüringen");
    assert_eq!(thuringia.tiles, 2);
    assert_eq!(thuringia.failed, 0);
    assert_eq!(thuringia.manifest, dir.path().join("Thüringen").join(MANIFEST_FILE_NAME));

    let dataset = read_manifest(&thuringia.manifest).unwrap();
    let images = dataset.images.unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(
        images[0].image_path(),
        Some(dir.path().join("Thüringen").join("town_TH_1.tiff").as_path())
    );
    assert!(dir.path().join("Thüringen").join("polygon.geojson").exists());
}

#[test]
fn test_clean_removes_a_downloaded_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = DownloadConfig::from_yaml(&format!("out_path: {}\n", dir.path().display())).unwrap();
    let area = AreaInput::Bounds([1_000.0, 1_000.0, 3_000.0, 2_000.0])
        .load(config.area_crs)
        .unwrap();
    let summary = run_download(&downloader(&config), &config, "town", &area, None).unwrap();

    let state_dir = summary.states[0].manifest.parent().unwrap().to_path_buf();
    assert!(state_dir.join("polygon.geojson").exists());
    assert!(delete_images(&state_dir).unwrap());
    assert!(!state_dir.exists());
}

#[test]
fn test_area_outside_states_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DownloadConfig::default();
    config.out_path = dir.path().to_path_buf();

    let area = AreaInput::Bounds([90_000.0, 90_000.0, 91_000.0, 91_000.0])
        .load(config.area_crs)
        .unwrap();
    let result = run_download(&downloader(&config), &config, "far", &area, None);
    assert!(matches!(result, Err(dopfetch_cli::CliError::Download(DopError::NoIntersectingStates))));
}
