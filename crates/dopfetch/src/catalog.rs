//! Built-in table of the federal states' orthophoto services.
//!
//! Each `(state, kind)` pair maps to one [`ConnectionDescriptor`]. Adding a
//! service is adding a row; there is no per-state client type.

use crate::geometry::ETRS89_UTM32;
use crate::service::{ConnectionDescriptor, ImageFormat, Secret, WmsVersion};
use crate::{DopError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Resolution of the DOP20 products in meters per pixel.
pub const DOP20_RESOLUTION: f64 = 0.2;

/// Largest request Bavaria's services answer, in pixels per side.
pub const BAVARIA_MAX_PIXELS: u32 = 6000;

/// The sixteen German federal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateCode {
    BW,
    BY,
    BE,
    BB,
    HB,
    HH,
    HE,
    MV,
    NI,
    NW,
    RP,
    SL,
    SN,
    ST,
    SH,
    TH,
}

impl StateCode {
    /// All states in catalog order.
    pub const ALL: [StateCode; 16] = [
        StateCode::BW,
        StateCode::BY,
        StateCode::BE,
        StateCode::BB,
        StateCode::HB,
        StateCode::HH,
        StateCode::HE,
        StateCode::MV,
        StateCode::NI,
        StateCode::NW,
        StateCode::RP,
        StateCode::SL,
        StateCode::SN,
        StateCode::ST,
        StateCode::SH,
        StateCode::TH,
    ];

    /// Two-letter code.
    pub fn as_str(&self) -> &'static str {
        match self {
            StateCode::BW => "BW",
            StateCode::BY => "BY",
            StateCode::BE => "BE",
            StateCode::BB => "BB",
            StateCode::HB => "HB",
            StateCode::HH => "HH",
            StateCode::HE => "HE",
            StateCode::MV => "MV",
            StateCode::NI => "NI",
            StateCode::NW => "NW",
            StateCode::RP => "RP",
            StateCode::SL => "SL",
            StateCode::SN => "SN",
            StateCode::ST => "ST",
            StateCode::SH => "SH",
            StateCode::TH => "TH",
        }
    }

    /// Parse a boundary feature id such as `"DE-BY"`.
    pub fn from_boundary_id(id: &str) -> Result<Self> {
        id.rsplit('-').next().unwrap_or(id).parse()
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateCode {
    type Err = DopError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        StateCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == upper)
            .ok_or_else(|| DopError::UnknownStateCode(s.to_string()))
    }
}

/// Band composition of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    /// True colour.
    Rgb,
    /// Colour infrared (NIR, R, G).
    Cir,
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Rgb => f.write_str("RGB"),
            ImageKind::Cir => f.write_str("CIR"),
        }
    }
}

/// Lookup table from `(state, kind)` to a service endpoint.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    profiles: HashMap<(StateCode, ImageKind), ConnectionDescriptor>,
}

fn dop20(url: &str, version: WmsVersion, layer: &str, format: ImageFormat) -> ConnectionDescriptor {
    ConnectionDescriptor::new(url, version, DOP20_RESOLUTION, layer, ETRS89_UTM32, format)
}

impl Catalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The DOP20 services of all sixteen states.
    ///
    /// Bremen, Lower Saxony, Saxony-Anhalt and Schleswig-Holstein publish no
    /// CIR product.
    pub fn germany() -> Self {
        use ImageFormat::{Png, Tiff};
        use ImageKind::{Cir, Rgb};
        use StateCode::*;
        use WmsVersion::{V1_1_1, V1_3_0};

        const BW_URL: &str = "https://owsproxy.lgl-bw.de/owsproxy/ows/";
        const BY_DOP20: &str = "https://geoservices.bayern.de/od/wms/dop/v1/dop20?";
        const BB_URL: &str = "https://isk.geobasis-bb.de/mapproxy/";
        const HH_URL: &str = "https://geodienste.hamburg.de/HH_WMS_DOP?language=ger&";
        const HE_URL: &str = "https://www.gds-srv.hessen.de/cgi-bin/lika-services/ogc-free-images.ows?";
        const NW_URL: &str = "https://www.wms.nrw.de/geobasis/wms_nw_dop";
        const TH_URL: &str = "https://www.geoproxy.geoportal-th.de/geoproxy/services/DOP20";

        let bavaria = |layer: &str| dop20(BY_DOP20, V1_1_1, layer, Tiff).with_max_pixels(BAVARIA_MAX_PIXELS);

        let rows = vec![
            ((BW, Rgb), dop20(&format!("{BW_URL}WMS_LGL-BW_ATKIS_DOP_20_C?"), V1_1_1, "IMAGES_DOP_20_RGB", Png)),
            ((BW, Cir), dop20(&format!("{BW_URL}WMS_LGL-BW_ATKIS_DOP_20_CIR"), V1_1_1, "IMAGES_DOP_20_CIR", Png)),
            ((BY, Rgb), bavaria("by_dop20c")),
            ((BY, Cir), bavaria("by_dop20cir")),
            ((BE, Rgb), dop20(&format!("{BB_URL}dop20c/service/wms"), V1_3_0, "bebb_dop20c", Png)),
            ((BE, Cir), dop20(&format!("{BB_URL}dop20cir/service/wms"), V1_3_0, "bb_dop20cir", Png)),
            ((BB, Rgb), dop20(&format!("{BB_URL}dop20c/service/wms"), V1_3_0, "bebb_dop20c", Png)),
            ((BB, Cir), dop20(&format!("{BB_URL}dop20cir/service/wms"), V1_3_0, "bb_dop20cir", Png)),
            (
                (HB, Rgb),
                dop20("https://geodienste.bremen.de/wms_dop20_2023?VERSION=1.3.0", V1_3_0, "DOP20_2023_HB", Tiff),
            ),
            ((HH, Rgb), dop20(HH_URL, V1_3_0, "DOP", Tiff)),
            ((HH, Cir), dop20(HH_URL, V1_3_0, "CIR_DOP", Tiff)),
            ((HE, Rgb), dop20(HE_URL, V1_3_0, "he_dop20_rgb", Tiff)),
            ((HE, Cir), dop20(HE_URL, V1_3_0, "he_dop20_cir", Tiff)),
            ((MV, Rgb), dop20("http://www.geodaten-mv.de/dienste/adv_dop", V1_3_0, "mv_dop", Tiff)),
            (
                (MV, Cir),
                dop20("http://www.geodaten-mv.de/dienste/gdimv_dopcir", V1_3_0, "gdimv_dopcir", Tiff),
            ),
            (
                (NI, Rgb),
                dop20(
                    "https://opendata.lgln.niedersachsen.de/doorman/noauth/dop_wms?language=ger&version=1.3.0&sld_version=1.1.0&layer=WMS_NI_DOP20&STYLE=default",
                    V1_3_0,
                    "ni_dop20",
                    Tiff,
                ),
            ),
            ((NW, Rgb), dop20(NW_URL, V1_1_1, "nw_dop_rgb", Tiff)),
            ((NW, Cir), dop20(NW_URL, V1_1_1, "nw_dop_cir", Tiff)),
            (
                (RP, Rgb),
                dop20("https://geo4.service24.rlp.de/wms/rp_dop20.fcgi?VERSION=1.1.1", V1_3_0, "rp_dop20", Tiff),
            ),
            (
                (RP, Cir),
                dop20(
                    "https://www.geoportal.rlp.de/mapbender/php/wms.php?inspire=1&layer_id=38922&withChilds=1",
                    V1_1_1,
                    "rp_dopcir",
                    Tiff,
                ),
            ),
            (
                (SL, Rgb),
                dop20("https://geoportal.saarland.de/freewms/dop2020", V1_1_1, "sl_dop2020", Tiff),
            ),
            (
                (SL, Cir),
                dop20("https://geoportal.saarland.de/freewms/dop2023?", V1_1_1, "sl_dop20_cir", Tiff),
            ),
            (
                (ST, Rgb),
                dop20(
                    "https://www.geodatenportal.sachsen-anhalt.de/wss/service/ST_LVermGeo_DOP_WMS_OpenData/guest",
                    V1_1_1,
                    "lsa_lvermgeo_dop20_2",
                    Png,
                ),
            ),
            (
                (SN, Rgb),
                dop20("https://geodienste.sachsen.de/wms_geosn_dop-rgb/guest", V1_3_0, "sn_dop_020", Tiff),
            ),
            (
                (SN, Cir),
                dop20("https://geodienste.sachsen.de/wms_geosn_dop-cir/guest", V1_3_0, "sn_dop_020_cir", Tiff),
            ),
            (
                (SH, Rgb),
                dop20("https://dienste.gdi-sh.de/WMS_SH_DOP20col_OpenGBD?", V1_1_1, "sh_dop20_rgb", Png),
            ),
            ((TH, Rgb), dop20(TH_URL, V1_1_1, "th_dop", Tiff)),
            ((TH, Cir), dop20(TH_URL, V1_1_1, "th_dop20cir", Png)),
        ];

        Self {
            profiles: rows.into_iter().collect(),
        }
    }

    /// Look up the service for a state and kind.
    pub fn get(&self, code: StateCode, kind: ImageKind) -> Result<&ConnectionDescriptor> {
        self.profiles
            .get(&(code, kind))
            .ok_or(DopError::MissingProfile { code, kind })
    }

    /// Add or replace a profile.
    pub fn insert(&mut self, code: StateCode, kind: ImageKind, descriptor: ConnectionDescriptor) {
        self.profiles.insert((code, kind), descriptor);
    }

    /// Number of profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Nationwide DOP20 RGB service of the federal agency (BKG), which requires
/// a customer UUID in the URL.
pub fn bkg_dop20_rgb(uuid: Secret) -> ConnectionDescriptor {
    ConnectionDescriptor::new(
        "https://sg.geodatenzentrum.de/wms_dop__{secret}?",
        WmsVersion::V1_1_1,
        DOP20_RESOLUTION,
        "rgb",
        ETRS89_UTM32,
        ImageFormat::Tiff,
    )
    .with_secret(uuid)
}

/// Bavaria's 40 cm product, for coarse overviews.
pub fn bavaria_dop40_rgb() -> ConnectionDescriptor {
    ConnectionDescriptor::new(
        "https://geoservices.bayern.de/od/wms/dop/v1/dop40?",
        WmsVersion::V1_1_1,
        0.4,
        "by_dop40c",
        ETRS89_UTM32,
        ImageFormat::Tiff,
    )
    .with_max_pixels(BAVARIA_MAX_PIXELS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_code_parsing() {
        assert_eq!("by".parse::<StateCode>().unwrap(), StateCode::BY);
        assert_eq!(StateCode::from_boundary_id("DE-NW").unwrap(), StateCode::NW);
        assert_eq!(StateCode::from_boundary_id("SH").unwrap(), StateCode::SH);
        assert!(matches!(
            StateCode::from_boundary_id("DE-XX"),
            Err(DopError::UnknownStateCode(_))
        ));
        assert_eq!(StateCode::HB.to_string(), "HB");
    }

    #[test]
    fn test_germany_catalog() {
        let catalog = Catalog::germany();
        for code in StateCode::ALL {
            assert!(catalog.get(code, ImageKind::Rgb).is_ok(), "missing RGB for {}", code);
        }
        for code in [StateCode::HB, StateCode::NI, StateCode::ST, StateCode::SH] {
            assert!(matches!(
                catalog.get(code, ImageKind::Cir),
                Err(DopError::MissingProfile { .. })
            ));
        }
        assert_eq!(catalog.len(), 28);

        let by = catalog.get(StateCode::BY, ImageKind::Rgb).unwrap();
        assert_eq!(by.max_pixels, Some(BAVARIA_MAX_PIXELS));
        assert_eq!(by.layer, "by_dop20c");

        let mv = catalog.get(StateCode::MV, ImageKind::Cir).unwrap();
        assert_eq!(mv.version, WmsVersion::V1_3_0);
        assert_eq!(mv.resolution_m, DOP20_RESOLUTION);
    }

    #[test]
    fn test_override_profile() {
        let mut catalog = Catalog::germany();
        catalog.insert(StateCode::NI, ImageKind::Rgb, bkg_dop20_rgb(Secret::new("abc")));
        let ni = catalog.get(StateCode::NI, ImageKind::Rgb).unwrap();
        assert_eq!(ni.layer, "rgb");
        assert!(!ni.redacted_url().contains("abc"));
    }

    #[test]
    fn test_dop40_resolution() {
        assert_eq!(bavaria_dop40_rgb().resolution_m, 0.4);
    }
}
