//! Masked fields: values paired with a same-shaped invalidity mask.
//!
//! `true` in a mask means the value is missing. Pointwise arithmetic ORs the
//! masks of its operands; reductions skip invalid entries and produce an
//! invalid slot when every input to that slot is invalid. Invalid slots produced
//! here store 0.0 so serialized artifacts never carry NaN for them.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{GwsError, GwsResult};

/// Deserialize a float array where JSON `null` stands for NaN.
pub(crate) fn null_as_nan_vec<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> Result<Vec<f64>, D::Error> {
    let v: Vec<Option<f64>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect())
}

// ── MaskedMap ────────────────────────────────────────────────────────────────

/// A lat × lon map, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskedMap {
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub data: Vec<f64>,
    pub mask: Vec<bool>,
    pub n_lat: usize,
    pub n_lon: usize,
}

impl MaskedMap {
    pub fn new(data: Vec<f64>, mask: Vec<bool>, n_lat: usize, n_lon: usize) -> GwsResult<Self> {
        let n = n_lat * n_lon;
        if data.len() != n || mask.len() != n {
            return Err(GwsError::invalid(format!(
                "map of {n_lat}×{n_lon} needs {n} values, got data={} mask={}",
                data.len(),
                mask.len()
            )));
        }
        Ok(Self { data, mask, n_lat, n_lon })
    }

    /// Mask entries equal to `fill` and non-finite entries.
    pub fn from_fill(data: Vec<f64>, fill: f64, n_lat: usize, n_lon: usize) -> GwsResult<Self> {
        let mask = data.iter().map(|&v| is_fill(v, fill)).collect();
        Self::new(data, mask, n_lat, n_lon)
    }

    pub fn masked_all(n_lat: usize, n_lon: usize) -> Self {
        Self {
            data: vec![0.0; n_lat * n_lon],
            mask: vec![true; n_lat * n_lon],
            n_lat,
            n_lon,
        }
    }

    #[inline]
    pub fn get(&self, lat: usize, lon: usize) -> Option<f64> {
        let k = lat * self.n_lon + lon;
        (!self.mask[k]).then_some(self.data[k])
    }

    pub fn is_masked(&self, lat: usize, lon: usize) -> bool {
        self.mask[lat * self.n_lon + lon]
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|m| !**m).count()
    }

    pub fn all_masked(&self) -> bool {
        self.mask.iter().all(|&m| m)
    }
}

// ── MaskedField3D ────────────────────────────────────────────────────────────

/// A time × lat × lon field, row-major with longitude varying fastest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskedField3D {
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub data: Vec<f64>,
    pub mask: Vec<bool>,
    pub n_time: usize,
    pub n_lat: usize,
    pub n_lon: usize,
}

impl MaskedField3D {
    pub fn new(
        data: Vec<f64>,
        mask: Vec<bool>,
        n_time: usize,
        n_lat: usize,
        n_lon: usize,
    ) -> GwsResult<Self> {
        let n = n_time * n_lat * n_lon;
        if data.len() != n || mask.len() != n {
            return Err(GwsError::invalid(format!(
                "field of {n_time}×{n_lat}×{n_lon} needs {n} values, got data={} mask={}",
                data.len(),
                mask.len()
            )));
        }
        Ok(Self { data, mask, n_time, n_lat, n_lon })
    }

    /// Mask entries equal to `fill` and non-finite entries.
    pub fn from_fill(
        data: Vec<f64>,
        fill: f64,
        n_time: usize,
        n_lat: usize,
        n_lon: usize,
    ) -> GwsResult<Self> {
        let mask = data.iter().map(|&v| is_fill(v, fill)).collect();
        Self::new(data, mask, n_time, n_lat, n_lon)
    }

    pub fn masked_all(n_time: usize, n_lat: usize, n_lon: usize) -> Self {
        let n = n_time * n_lat * n_lon;
        Self { data: vec![0.0; n], mask: vec![true; n], n_time, n_lat, n_lon }
    }

    #[inline]
    pub fn plane(&self) -> usize {
        self.n_lat * self.n_lon
    }

    #[inline]
    pub fn index(&self, t: usize, lat: usize, lon: usize) -> usize {
        t * self.plane() + lat * self.n_lon + lon
    }

    #[inline]
    pub fn get(&self, t: usize, lat: usize, lon: usize) -> Option<f64> {
        let k = self.index(t, lat, lon);
        (!self.mask[k]).then_some(self.data[k])
    }

    pub fn same_shape(&self, other: &MaskedField3D) -> bool {
        self.n_time == other.n_time && self.n_lat == other.n_lat && self.n_lon == other.n_lon
    }

    fn check_shape(&self, other: &MaskedField3D, op: &str) -> GwsResult<()> {
        if self.same_shape(other) {
            Ok(())
        } else {
            Err(GwsError::invalid(format!(
                "{op}: shape {}×{}×{} vs {}×{}×{}",
                self.n_time, self.n_lat, self.n_lon, other.n_time, other.n_lat, other.n_lon
            )))
        }
    }

    fn check_map(&self, map: &MaskedMap, op: &str) -> GwsResult<()> {
        if self.n_lat == map.n_lat && self.n_lon == map.n_lon {
            Ok(())
        } else {
            Err(GwsError::invalid(format!(
                "{op}: field plane {}×{} vs map {}×{}",
                self.n_lat, self.n_lon, map.n_lat, map.n_lon
            )))
        }
    }

    // ── Pointwise arithmetic ─────────────────────────────────────────────────

    /// Combine two fields pointwise; the result is invalid wherever either is.
    pub fn zip_with(
        &self,
        other: &MaskedField3D,
        f: impl Fn(f64, f64) -> f64,
    ) -> GwsResult<MaskedField3D> {
        self.check_shape(other, "zip_with")?;
        let mut out = MaskedField3D::masked_all(self.n_time, self.n_lat, self.n_lon);
        for k in 0..self.data.len() {
            if !(self.mask[k] || other.mask[k]) {
                out.data[k] = f(self.data[k], other.data[k]);
                out.mask[k] = false;
            }
        }
        Ok(out)
    }

    pub fn add(&self, other: &MaskedField3D) -> GwsResult<MaskedField3D> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &MaskedField3D) -> GwsResult<MaskedField3D> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn scale(&self, k: f64) -> MaskedField3D {
        let mut out = self.clone();
        for (v, &m) in out.data.iter_mut().zip(&self.mask) {
            *v = if m { 0.0 } else { *v * k };
        }
        out
    }

    /// Multiply every time slice by `map`.
    pub fn mul_map(&self, map: &MaskedMap) -> GwsResult<MaskedField3D> {
        self.map_op(map, "mul_map", |a, b| a * b)
    }

    /// Subtract `map` from time slice `t` in place.
    pub fn subtract_map_at(&mut self, t: usize, map: &MaskedMap) -> GwsResult<()> {
        self.check_map(map, "subtract_map_at")?;
        if t >= self.n_time {
            return Err(GwsError::invalid(format!("time index {t} outside 0..{}", self.n_time)));
        }
        let plane = self.plane();
        for p in 0..plane {
            let k = t * plane + p;
            if self.mask[k] || map.mask[p] {
                self.mask[k] = true;
                self.data[k] = 0.0;
            } else {
                self.data[k] -= map.data[p];
            }
        }
        Ok(())
    }

    fn map_op(
        &self,
        map: &MaskedMap,
        op: &str,
        f: impl Fn(f64, f64) -> f64,
    ) -> GwsResult<MaskedField3D> {
        self.check_map(map, op)?;
        let plane = self.plane();
        let mut out = MaskedField3D::masked_all(self.n_time, self.n_lat, self.n_lon);
        for t in 0..self.n_time {
            for p in 0..plane {
                let k = t * plane + p;
                if !(self.mask[k] || map.mask[p]) {
                    out.data[k] = f(self.data[k], map.data[p]);
                    out.mask[k] = false;
                }
            }
        }
        Ok(out)
    }

    // ── Reductions ───────────────────────────────────────────────────────────

    /// Mean over all time steps, ignoring invalid entries.
    pub fn temporal_mean(&self) -> MaskedMap {
        let all: Vec<usize> = (0..self.n_time).collect();
        self.temporal_mean_over(&all)
    }

    /// Mean over the given time indices, ignoring invalid entries. An empty
    /// index set yields a fully invalid map.
    pub fn temporal_mean_over(&self, times: &[usize]) -> MaskedMap {
        let plane = self.plane();
        let mut sum = vec![0f64; plane];
        let mut count = vec![0usize; plane];
        for &t in times {
            let base = t * plane;
            for p in 0..plane {
                if !self.mask[base + p] {
                    sum[p] += self.data[base + p];
                    count[p] += 1;
                }
            }
        }
        let mut out = MaskedMap::masked_all(self.n_lat, self.n_lon);
        for p in 0..plane {
            if count[p] > 0 {
                out.data[p] = sum[p] / count[p] as f64;
                out.mask[p] = false;
            }
        }
        out
    }

    /// The field minus its own temporal mean (anomaly w.r.t. the record mean).
    pub fn subtract_temporal_mean(&self) -> MaskedField3D {
        let mean = self.temporal_mean();
        // Shapes agree by construction.
        self.map_op(&mean, "subtract_temporal_mean", |a, b| a - b)
            .unwrap_or_else(|_| MaskedField3D::masked_all(self.n_time, self.n_lat, self.n_lon))
    }

    /// Largest and smallest valid values with their flat indices; the first
    /// occurrence wins on ties. `None` if nothing is valid.
    pub fn valid_extremes(&self) -> Option<((f64, usize), (f64, usize))> {
        let mut best: Option<((f64, usize), (f64, usize))> = None;
        for (k, (&v, &m)) in self.data.iter().zip(&self.mask).enumerate() {
            if m {
                continue;
            }
            best = Some(match best {
                None => ((v, k), (v, k)),
                Some((max, min)) => (
                    if v > max.0 { (v, k) } else { max },
                    if v < min.0 { (v, k) } else { min },
                ),
            });
        }
        best
    }

    /// Split a flat index into `(t, lat, lon)`.
    pub fn unravel(&self, k: usize) -> (usize, usize, usize) {
        let plane = self.plane();
        (k / plane, (k % plane) / self.n_lon, k % self.n_lon)
    }

    // ── Masks ────────────────────────────────────────────────────────────────

    /// OR a lat × lon mask into every time slice.
    pub fn or_spatial_mask(&mut self, spatial: &[bool]) -> GwsResult<()> {
        let plane = self.plane();
        if spatial.len() != plane {
            return Err(GwsError::invalid(format!(
                "spatial mask has {} cells, field plane has {plane}",
                spatial.len()
            )));
        }
        for t in 0..self.n_time {
            for p in (0..plane).filter(|&p| spatial[p]) {
                self.mask[t * plane + p] = true;
                self.data[t * plane + p] = 0.0;
            }
        }
        Ok(())
    }

    /// OR a per-time mask into every cell of the matching slice.
    pub fn or_temporal_mask(&mut self, temporal: &[bool]) -> GwsResult<()> {
        if temporal.len() != self.n_time {
            return Err(GwsError::invalid(format!(
                "temporal mask has {} steps, field has {}",
                temporal.len(),
                self.n_time
            )));
        }
        let plane = self.plane();
        for (t, _) in temporal.iter().enumerate().filter(|(_, m)| **m) {
            self.mask[t * plane..(t + 1) * plane].fill(true);
            self.data[t * plane..(t + 1) * plane].fill(0.0);
        }
        Ok(())
    }

    /// Mask of one cell through time.
    pub fn time_mask_at(&self, lat: usize, lon: usize) -> Vec<bool> {
        (0..self.n_time).map(|t| self.mask[self.index(t, lat, lon)]).collect()
    }

    /// Mask of one time slice.
    pub fn spatial_mask_at(&self, t: usize) -> &[bool] {
        let plane = self.plane();
        &self.mask[t * plane..(t + 1) * plane]
    }

    /// Values of one cell through time (`None` where invalid).
    pub fn time_series(&self, lat: usize, lon: usize) -> Vec<Option<f64>> {
        (0..self.n_time).map(|t| self.get(t, lat, lon)).collect()
    }

    // ── Reshaping ────────────────────────────────────────────────────────────

    /// Keep only the latitude rows in `rows`.
    pub fn subset_rows(&self, rows: Range<usize>) -> GwsResult<MaskedField3D> {
        if rows.is_empty() || rows.end > self.n_lat {
            return Err(GwsError::invalid(format!(
                "row range {rows:?} is outside 0..{}",
                self.n_lat
            )));
        }
        let n_lat = rows.len();
        let mut data = Vec::with_capacity(self.n_time * n_lat * self.n_lon);
        let mut mask = Vec::with_capacity(data.capacity());
        for t in 0..self.n_time {
            let lo = self.index(t, rows.start, 0);
            let hi = self.index(t, rows.end - 1, self.n_lon - 1) + 1;
            data.extend_from_slice(&self.data[lo..hi]);
            mask.extend_from_slice(&self.mask[lo..hi]);
        }
        MaskedField3D::new(data, mask, self.n_time, n_lat, self.n_lon)
    }

    /// Rotate every row left by `shift` columns: column `shift` becomes column 0.
    pub fn rotate_lon(&self, shift: usize) -> MaskedField3D {
        let mut out = self.clone();
        if self.n_lon == 0 {
            return out;
        }
        let shift = shift % self.n_lon;
        for row in 0..self.n_time * self.n_lat {
            let r = row * self.n_lon..(row + 1) * self.n_lon;
            out.data[r.clone()].rotate_left(shift);
            out.mask[r].rotate_left(shift);
        }
        out
    }
}

#[inline]
fn is_fill(v: f64, fill: f64) -> bool {
    !v.is_finite() || v == fill
}
