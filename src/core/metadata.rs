use crate::types::{MaskError, MaskResult};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Product short name:
///
/// ```text
/// S2<mission><level>_<YYYYMMDD>_<orbit>_<tile or area>_<product type>_<res>[.<ext>]
/// S2A2A_20200101_022_32TNR_BOA_10.tif
/// ```
static SHORTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^S2([A-Z])(1C|2A)_(\d{8})_(\d{3})_([^_.]+)_([A-Z0-9]+)_(\d+)m?(?:\.(.*))?$",
    )
    .expect("static product name pattern")
});

/// MGRS tile identifiers such as 32TNR
static TILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2}[A-Z]{3}$").expect("static tile pattern"));

/// Spatial extent a product covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtentKind {
    /// A single MGRS tile
    Tile,
    /// A clipped or merged area of interest
    Area,
}

/// Metadata encoded in a product filename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductMetadata {
    /// Platform letter (A, B, C)
    pub mission: String,
    /// Processing level, "1C" or "2A"
    pub level: String,
    pub sensing_date: NaiveDate,
    pub orbit_id: String,
    pub tile_or_area_id: String,
    pub product_type: String,
    /// Ground resolution in metres
    pub resolution: u32,
    pub file_extension: String,
}

impl ProductMetadata {
    /// Parse the filename of `path`
    pub fn parse<P: AsRef<Path>>(path: P) -> MaskResult<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| MaskError::MetadataParse(path.display().to_string()))?;

        let captures = SHORTNAME_RE
            .captures(filename)
            .ok_or_else(|| MaskError::MetadataParse(filename.to_string()))?;

        let sensing_date = NaiveDate::parse_from_str(&captures[3], "%Y%m%d").map_err(|e| {
            MaskError::MetadataParse(format!("{} (invalid sensing date: {})", filename, e))
        })?;
        let resolution = captures[7].parse::<u32>().map_err(|e| {
            MaskError::MetadataParse(format!("{} (invalid resolution: {})", filename, e))
        })?;

        Ok(Self {
            mission: captures[1].to_string(),
            level: captures[2].to_string(),
            sensing_date,
            orbit_id: captures[4].to_string(),
            tile_or_area_id: captures[5].to_string(),
            product_type: captures[6].to_string(),
            resolution,
            file_extension: captures
                .get(8)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        })
    }

    /// Acquisition type: a native tile or a clipped/merged area
    pub fn extent_kind(&self) -> ExtentKind {
        if TILE_RE.is_match(&self.tile_or_area_id) {
            ExtentKind::Tile
        } else {
            ExtentKind::Area
        }
    }

    /// Whether both products come from the same acquisition on the same grid
    ///
    /// Compares acquisition type, mission, sensing date, orbit, tile/area and
    /// resolution. Processing level is not compared: level-1C products are
    /// masked with the level-2A classification of the same acquisition.
    pub fn same_acquisition(&self, other: &ProductMetadata) -> bool {
        self.extent_kind() == other.extent_kind()
            && self.mission == other.mission
            && self.sensing_date == other.sensing_date
            && self.orbit_id == other.orbit_id
            && self.tile_or_area_id == other.tile_or_area_id
            && self.resolution == other.resolution
    }
}

/// Classification raster available for matching
#[derive(Debug, Clone)]
pub struct ClassificationCandidate {
    pub path: PathBuf,
    pub metadata: ProductMetadata,
}

/// Pairs input rasters with their classification rasters
#[derive(Debug, Clone, Default)]
pub struct MetadataMatcher {
    candidates: Vec<ClassificationCandidate>,
}

impl MetadataMatcher {
    /// Index candidate classification rasters, keeping their order
    ///
    /// Candidates whose names cannot be parsed are ignored.
    pub fn new<P: AsRef<Path>>(paths: &[P]) -> Self {
        let candidates = paths
            .iter()
            .filter_map(|p| match ProductMetadata::parse(p) {
                Ok(metadata) => Some(ClassificationCandidate {
                    path: p.as_ref().to_path_buf(),
                    metadata,
                }),
                Err(e) => {
                    log::warn!("Ignoring classification raster: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();

        log::debug!("Indexed {} classification raster(s)", candidates.len());
        Self { candidates }
    }

    pub fn candidates(&self) -> &[ClassificationCandidate] {
        &self.candidates
    }

    /// First candidate of `product_type` from the same acquisition as `input`
    pub fn find(&self, input: &ProductMetadata, product_type: &str) -> Option<&Path> {
        self.candidates
            .iter()
            .find(|c| c.metadata.product_type == product_type && c.metadata.same_acquisition(input))
            .map(|c| c.path.as_path())
    }

    /// Like [`find`](Self::find), failing with `MissingAncillary`
    pub fn require(
        &self,
        input_path: &Path,
        input: &ProductMetadata,
        product_type: &str,
    ) -> MaskResult<PathBuf> {
        self.find(input, product_type)
            .map(Path::to_path_buf)
            .ok_or_else(|| MaskError::MissingAncillary {
                input: input_path.display().to_string(),
                product_type: product_type.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shortname() {
        let meta = ProductMetadata::parse("/data/S2A2A_20200101_022_32TNR_BOA_10.tif").unwrap();

        assert_eq!(meta.mission, "A");
        assert_eq!(meta.level, "2A");
        assert_eq!(meta.sensing_date, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(meta.orbit_id, "022");
        assert_eq!(meta.tile_or_area_id, "32TNR");
        assert_eq!(meta.product_type, "BOA");
        assert_eq!(meta.resolution, 10);
        assert_eq!(meta.file_extension, "tif");
        assert_eq!(meta.extent_kind(), ExtentKind::Tile);
    }

    #[test]
    fn test_parse_area_without_extension() {
        let meta = ProductMetadata::parse("S2B1C_20190723_108_Barbellino_TOA_20m").unwrap();
        assert_eq!(meta.resolution, 20);
        assert_eq!(meta.file_extension, "");
        assert_eq!(meta.extent_kind(), ExtentKind::Area);
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        for name in [
            "scene.tif",
            "S2A2A_2020010_022_32TNR_BOA_10.tif",
            "S2A2A_20201301_022_32TNR_BOA_10.tif",
            "S2A3A_20200101_022_32TNR_BOA_10.tif",
            "S2A2A_20200101_22_32TNR_BOA_10.tif",
        ] {
            assert!(
                matches!(ProductMetadata::parse(name), Err(MaskError::MetadataParse(_))),
                "{} should not parse",
                name
            );
        }
    }

    #[test]
    fn test_matcher_selects_first_matching_candidate() {
        let matcher = MetadataMatcher::new(&[
            "a/S2A2A_20200101_023_32TNR_SCL_10.tif",
            "b/S2A2A_20200101_022_32TNR_SCL_20.tif",
            "c/S2A2A_20200101_022_32TNR_SCL_10.tif",
            "d/S2A2A_20200101_022_32TNR_SCL_10.tif",
            "not-a-product.tif",
        ]);
        assert_eq!(matcher.candidates().len(), 4);

        let input = ProductMetadata::parse("S2A2A_20200101_022_32TNR_BOA_10.tif").unwrap();
        assert_eq!(
            matcher.find(&input, "SCL"),
            Some(Path::new("c/S2A2A_20200101_022_32TNR_SCL_10.tif"))
        );
        assert_eq!(matcher.find(&input, "CLD"), None);
    }

    #[test]
    fn test_level_1c_inputs_use_level_2a_classification() {
        let matcher = MetadataMatcher::new(&["S2A2A_20200101_022_32TNR_SCL_20.tif"]);
        let toa = ProductMetadata::parse("S2A1C_20200101_022_32TNR_TOA_20.tif").unwrap();
        assert!(matcher.find(&toa, "SCL").is_some());
    }

    #[test]
    fn test_join_keys() {
        let input = ProductMetadata::parse("S2A1C_20200101_022_32TNR_TOA_10.tif").unwrap();
        for other in [
            "S2A2A_20200101_022_32TNS_SCL_10.tif",
            "S2B2A_20200101_022_32TNR_SCL_10.tif",
            "S2A2A_20200102_022_32TNR_SCL_10.tif",
            "S2A2A_20200101_022_Barbellino_SCL_10.tif",
        ] {
            let candidate = ProductMetadata::parse(other).unwrap();
            assert!(!input.same_acquisition(&candidate), "{} should not pair", other);
        }

        let scl = ProductMetadata::parse("S2A2A_20200101_022_32TNR_SCL_10.tif").unwrap();
        assert!(input.same_acquisition(&scl));
    }

    #[test]
    fn test_require_reports_missing_ancillary() {
        let matcher = MetadataMatcher::new(&["S2A2A_20200101_099_32TNR_SCL_10.tif"]);
        let path = Path::new("S2A2A_20200101_022_32TNR_BOA_10.tif");
        let input = ProductMetadata::parse(path).unwrap();

        match matcher.require(path, &input, "SCL") {
            Err(MaskError::MissingAncillary { product_type, .. }) => {
                assert_eq!(product_type, "SCL")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
