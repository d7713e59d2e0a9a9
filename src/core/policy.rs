use crate::types::{MaskError, MaskResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Product type of the Sentinel-2 scene classification layer
pub const SCL: &str = "SCL";

/// Classification codes whose pixels are suppressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassValueSet {
    codes: BTreeSet<i32>,
}

impl ClassValueSet {
    pub fn new<I: IntoIterator<Item = i32>>(codes: I) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }

    pub fn contains(&self, code: i32) -> bool {
        self.codes.contains(&code)
    }

    /// Codes in ascending order
    pub fn codes(&self) -> Vec<i32> {
        self.codes.iter().copied().collect()
    }
}

/// One classification raster required by a policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskLayer {
    /// Product type of the classification raster, e.g. "SCL"
    pub product_type: &'static str,
    pub suppressed: ClassValueSet,
}

/// Named masking policies
///
/// SCL codes: 0 no data, 3 cloud shadow, 7 unclassified (low cloud
/// probability), 8 medium cloud probability, 9 high cloud probability,
/// 10 thin cirrus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskPolicy {
    Nodata,
    CloudHighProba,
    CloudMediumProba,
    CloudLowProba,
    CloudAndShadow,
    CloudShadowCirrus,
}

impl MaskPolicy {
    pub const ALL: [MaskPolicy; 6] = [
        MaskPolicy::Nodata,
        MaskPolicy::CloudHighProba,
        MaskPolicy::CloudMediumProba,
        MaskPolicy::CloudLowProba,
        MaskPolicy::CloudAndShadow,
        MaskPolicy::CloudShadowCirrus,
    ];

    /// Resolve a policy name (case-sensitive)
    pub fn parse(name: &str) -> MaskResult<Self> {
        match name {
            "nodata" => Ok(MaskPolicy::Nodata),
            "cloud_high_proba" => Ok(MaskPolicy::CloudHighProba),
            "cloud_medium_proba" => Ok(MaskPolicy::CloudMediumProba),
            "cloud_low_proba" => Ok(MaskPolicy::CloudLowProba),
            "cloud_and_shadow" => Ok(MaskPolicy::CloudAndShadow),
            "cloud_shadow_cirrus" => Ok(MaskPolicy::CloudShadowCirrus),
            "opaque_clouds" => Err(MaskError::UnsupportedPolicy(
                "opaque_clouds is not implemented".to_string(),
            )),
            other => Err(MaskError::UnsupportedPolicy(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MaskPolicy::Nodata => "nodata",
            MaskPolicy::CloudHighProba => "cloud_high_proba",
            MaskPolicy::CloudMediumProba => "cloud_medium_proba",
            MaskPolicy::CloudLowProba => "cloud_low_proba",
            MaskPolicy::CloudAndShadow => "cloud_and_shadow",
            MaskPolicy::CloudShadowCirrus => "cloud_shadow_cirrus",
        }
    }

    fn scl_codes(&self) -> &'static [i32] {
        match self {
            MaskPolicy::Nodata => &[0],
            MaskPolicy::CloudHighProba => &[0, 9],
            MaskPolicy::CloudMediumProba => &[0, 8, 9],
            MaskPolicy::CloudLowProba => &[0, 7, 8, 9],
            MaskPolicy::CloudAndShadow => &[0, 3, 7, 8, 9],
            MaskPolicy::CloudShadowCirrus => &[0, 3, 7, 8, 9, 10],
        }
    }

    /// Classification layers this policy needs, one per product type
    pub fn layers(&self) -> Vec<MaskLayer> {
        vec![MaskLayer {
            product_type: SCL,
            suppressed: ClassValueSet::new(self.scl_codes().iter().copied()),
        }]
    }
}

impl FromStr for MaskPolicy {
    type Err = MaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MaskPolicy::parse(s)
    }
}

impl std::fmt::Display for MaskPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        let expected: [(&str, &[i32]); 6] = [
            ("nodata", &[0]),
            ("cloud_high_proba", &[0, 9]),
            ("cloud_medium_proba", &[0, 8, 9]),
            ("cloud_low_proba", &[0, 7, 8, 9]),
            ("cloud_and_shadow", &[0, 3, 7, 8, 9]),
            ("cloud_shadow_cirrus", &[0, 3, 7, 8, 9, 10]),
        ];

        for (name, codes) in expected {
            let policy: MaskPolicy = name.parse().unwrap();
            assert_eq!(policy.name(), name);

            let layers = policy.layers();
            assert_eq!(layers.len(), 1);
            assert_eq!(layers[0].product_type, SCL);
            assert_eq!(layers[0].suppressed.codes(), codes.to_vec());
        }
    }

    #[test]
    fn test_unsupported_policies() {
        for name in ["opaque_clouds", "Cloud_High_Proba", "clouds", ""] {
            assert!(matches!(
                MaskPolicy::parse(name),
                Err(MaskError::UnsupportedPolicy(_))
            ));
        }
    }

    #[test]
    fn test_all_policies_round_trip_names() {
        for policy in MaskPolicy::ALL {
            assert_eq!(MaskPolicy::parse(policy.name()).unwrap(), policy);
        }
    }
}
