//! On-disk artifacts passed between the tools.
//!
//! All artifacts are JSON. Invalid slots carry `true` in `mask`; their data
//! values are meaningless and NaN is written as `null`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::calendar::{days_to_dates, Source};
use crate::error::{GwsError, GwsResult};
use crate::grid::GeoGrid;
use crate::masked::{null_as_nan_vec, MaskedField3D, MaskedMap};

fn write_json<T: Serialize>(value: &T, path: &Path) -> GwsResult<()> {
    let json = serde_json::to_string(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> GwsResult<T> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

// ── AnomalyCube ──────────────────────────────────────────────────────────────

/// Groundwater storage anomaly (cm EWT) on the satellite timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyCube {
    /// Row-major time × lat × lon.
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub data: Vec<f64>,
    pub mask: Vec<bool>,
    /// Satellite day offsets since 2002-01-01.
    pub time: Vec<f64>,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
}

impl AnomalyCube {
    pub fn new(field: MaskedField3D, time: Vec<f64>, grid: &GeoGrid) -> GwsResult<Self> {
        if field.n_time != time.len() || field.n_lat != grid.n_lat() || field.n_lon != grid.n_lon() {
            return Err(GwsError::invalid(format!(
                "cube {}×{}×{} does not match axes {}×{}×{}",
                field.n_time,
                field.n_lat,
                field.n_lon,
                time.len(),
                grid.n_lat(),
                grid.n_lon()
            )));
        }
        Ok(Self {
            data: field.data,
            mask: field.mask,
            time,
            lat: grid.lats().to_vec(),
            lon: grid.lons().to_vec(),
        })
    }

    pub fn field(&self) -> GwsResult<MaskedField3D> {
        MaskedField3D::new(
            self.data.clone(),
            self.mask.clone(),
            self.time.len(),
            self.lat.len(),
            self.lon.len(),
        )
    }

    pub fn grid(&self) -> GwsResult<GeoGrid> {
        GeoGrid::new(self.lat.clone(), self.lon.clone())
    }

    pub fn dates(&self) -> GwsResult<Vec<NaiveDate>> {
        days_to_dates(&self.time, Source::Grace.epoch())
    }

    pub fn save(&self, path: &Path) -> GwsResult<()> {
        write_json(self, path)
    }

    pub fn load(path: &Path) -> GwsResult<Self> {
        let cube: AnomalyCube = read_json(path)?;
        // Validate shapes on the way in.
        cube.field()?;
        cube.grid()?;
        Ok(cube)
    }
}

// ── DeviationCube ────────────────────────────────────────────────────────────

/// Anomaly minus its monthly climatology, same shape as the source cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviationCube(pub MaskedField3D);

impl DeviationCube {
    pub fn save(&self, path: &Path) -> GwsResult<()> {
        write_json(self, path)
    }

    pub fn load(path: &Path) -> GwsResult<Self> {
        let cube: DeviationCube = read_json(path)?;
        let f = &cube.0;
        MaskedField3D::new(f.data.clone(), f.mask.clone(), f.n_time, f.n_lat, f.n_lon)?;
        Ok(cube)
    }
}

// ── MapSet ───────────────────────────────────────────────────────────────────

/// A keyed stack of maps on one grid: months 1..=12 or water years.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSet {
    pub keys: Vec<i32>,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    pub maps: Vec<MaskedMap>,
}

impl MapSet {
    pub fn new(entries: Vec<(i32, MaskedMap)>, grid: &GeoGrid) -> GwsResult<Self> {
        if let Some((k, _)) = entries
            .iter()
            .find(|(_, m)| m.n_lat != grid.n_lat() || m.n_lon != grid.n_lon())
        {
            return Err(GwsError::invalid(format!("map `{k}` does not match the grid")));
        }
        let (keys, maps) = entries.into_iter().unzip();
        Ok(Self { keys, lat: grid.lats().to_vec(), lon: grid.lons().to_vec(), maps })
    }

    pub fn get(&self, key: i32) -> Option<&MaskedMap> {
        self.keys.iter().position(|&k| k == key).map(|i| &self.maps[i])
    }

    pub fn save(&self, path: &Path) -> GwsResult<()> {
        write_json(self, path)
    }

    pub fn load(path: &Path) -> GwsResult<Self> {
        read_json(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GeoGrid {
        GeoGrid::new(vec![-35.5, -34.5], vec![301.5, 302.5, 303.5]).unwrap()
    }

    #[test]
    fn cube_rejects_mismatched_axes() {
        let f = MaskedField3D::masked_all(2, 2, 3);
        assert!(AnomalyCube::new(f.clone(), vec![15.0], &grid()).is_err());
        assert!(AnomalyCube::new(f, vec![15.0, 45.0], &grid()).is_ok());
    }

    #[test]
    fn cube_survives_disk_with_nan_payload() {
        let mut f = MaskedField3D::new(vec![1.5; 6], vec![false; 6], 1, 2, 3).unwrap();
        f.data[4] = f64::NAN;
        f.mask[4] = true;
        let cube = AnomalyCube::new(f, vec![15.0], &grid()).unwrap();

        let path = std::env::temp_dir().join(format!("gws_cube_{}.json", std::process::id()));
        cube.save(&path).unwrap();
        let back = AnomalyCube::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(back.mask, cube.mask);
        assert!(back.data[4].is_nan());
        assert_eq!(back.data[5], 1.5);
        assert_eq!(back.dates().unwrap()[0], NaiveDate::from_ymd_opt(2002, 1, 16).unwrap());
    }

    #[test]
    fn map_set_lookup_by_key() {
        let m = MaskedMap::masked_all(2, 3);
        let set = MapSet::new(vec![(2003, m.clone()), (2004, m)], &grid()).unwrap();
        assert!(set.get(2004).is_some());
        assert!(set.get(2002).is_none());
        assert!(MapSet::new(vec![(1, MaskedMap::masked_all(1, 1))], &grid()).is_err());
    }
}
