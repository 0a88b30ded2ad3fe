//! Raw input bundles.
//!
//! Each product is supplied as a JSON bundle holding its coordinate axes, its
//! fill-value sentinel and one or more flat row-major variables (time × lat ×
//! lon, or lat × lon for time-less products). JSON `null` reads as NaN.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{GwsError, GwsResult};
use crate::grid::GeoGrid;
use crate::masked::{MaskedField3D, MaskedMap};

fn null_as_nan_map<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> Result<BTreeMap<String, Vec<f64>>, D::Error> {
    let v: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::deserialize(d)?;
    Ok(v.into_iter()
        .map(|(k, xs)| (k, xs.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect()))
        .collect())
}

/// One product's arrays as read from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceBundle {
    /// Day offsets since the product epoch; empty for time-less products.
    #[serde(default)]
    pub time: Vec<f64>,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    /// Sentinel marking missing values.
    pub fill_value: f64,
    #[serde(deserialize_with = "null_as_nan_map")]
    pub variables: BTreeMap<String, Vec<f64>>,
}

impl SourceBundle {
    pub fn from_json_str(s: &str) -> GwsResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load(path: &Path) -> GwsResult<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn grid(&self) -> GwsResult<GeoGrid> {
        GeoGrid::new(self.lat.clone(), self.lon.clone())
    }

    fn variable(&self, name: &str) -> GwsResult<&[f64]> {
        self.variables
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| GwsError::invalid(format!("variable `{name}` not in bundle")))
    }

    /// A time × lat × lon variable with fill values masked.
    pub fn field(&self, name: &str) -> GwsResult<MaskedField3D> {
        if self.time.is_empty() {
            return Err(GwsError::invalid(format!(
                "variable `{name}` requested as a time series but the bundle has no time axis"
            )));
        }
        let data = self.variable(name)?.to_vec();
        MaskedField3D::from_fill(data, self.fill_value, self.time.len(), self.lat.len(), self.lon.len())
    }

    /// A lat × lon variable with fill values masked.
    pub fn map(&self, name: &str) -> GwsResult<MaskedMap> {
        let data = self.variable(name)?.to_vec();
        MaskedMap::from_fill(data, self.fill_value, self.lat.len(), self.lon.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLE: &str = r#"{
        "time": [15.5, 45.0],
        "lat": [-1.0, 0.0],
        "lon": [10.0, 11.0, 12.0],
        "fill_value": -99999.0,
        "variables": {
            "lwe_thickness": [1, 2, 3, 4, 5, null, 7, 8, -99999, 10, 11, 12]
        }
    }"#;

    #[test]
    fn reads_field_with_fill_and_nulls_masked() {
        let b = SourceBundle::from_json_str(BUNDLE).unwrap();
        let f = b.field("lwe_thickness").unwrap();
        assert_eq!((f.n_time, f.n_lat, f.n_lon), (2, 2, 3));
        assert!(f.get(0, 1, 2).is_none());
        assert!(f.get(1, 0, 2).is_none());
        assert_eq!(f.get(1, 1, 2), Some(12.0));
        assert_eq!(b.grid().unwrap().n_lon(), 3);
    }

    #[test]
    fn missing_variable_and_wrong_length_are_invalid() {
        let b = SourceBundle::from_json_str(BUNDLE).unwrap();
        assert!(matches!(b.field("nope"), Err(GwsError::InvalidInput(_))));
        // 12 values do not fit a 2×3 map.
        assert!(matches!(b.map("lwe_thickness"), Err(GwsError::InvalidInput(_))));
    }
}
