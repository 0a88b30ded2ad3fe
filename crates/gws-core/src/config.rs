//! Run configuration, loaded from JSON. Every field has a default matching the
//! Argentine study setup, so an empty `{}` file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::GwsResult;
use crate::polygon::DiscSupersampling;

/// Grid cell whose satellite time mask defines the valid epochs of the
/// whole study area. Resolved to the nearest node of the fused grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCell {
    pub lat: f64,
    pub lon: f64,
}

impl Default for ReferenceCell {
    fn default() -> Self {
        Self { lat: -34.5, lon: 302.5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub reference_cell: ReferenceCell,
    /// Satellite latitude rows kept to match the land-model coverage
    /// (`start..end`). Derived from the axes when absent.
    pub grace_lat_rows: Option<(usize, usize)>,
    pub inclusion: DiscSupersampling,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            reference_cell: ReferenceCell::default(),
            grace_lat_rows: None,
            inclusion: DiscSupersampling::default(),
        }
    }
}

/// Inclusive range of candidate water years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterYearConfig {
    pub first: i32,
    pub last: i32,
}

impl Default for WaterYearConfig {
    fn default() -> Self {
        Self { first: 2002, last: 2016 }
    }
}

impl WaterYearConfig {
    pub fn candidates(&self) -> Vec<i32> {
        (self.first..=self.last).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fusion: FusionConfig,
    pub water_years: WaterYearConfig,
}

impl PipelineConfig {
    pub fn from_json_str(s: &str) -> GwsResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load(path: &Path) -> GwsResult<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let c = PipelineConfig::from_json_str("{}").unwrap();
        assert_eq!(c, PipelineConfig::default());
        assert_eq!(c.water_years.candidates().len(), 15);
        assert_eq!(c.fusion.inclusion.samples, 32);
    }

    #[test]
    fn partial_overrides_keep_other_defaults() {
        let c = PipelineConfig::from_json_str(
            r#"{"fusion": {"reference_cell": {"lat": -30.5, "lon": 300.5},
                           "inclusion": {"radius_deg": 0.5}},
                "water_years": {"last": 2010}}"#,
        )
        .unwrap();
        assert_eq!(c.fusion.reference_cell.lat, -30.5);
        assert_eq!(c.fusion.inclusion.radius_deg, 0.5);
        assert_eq!(c.fusion.inclusion.margin_deg, 1.0);
        assert_eq!(c.water_years.first, 2002);
        assert_eq!(c.water_years.last, 2010);
    }
}
