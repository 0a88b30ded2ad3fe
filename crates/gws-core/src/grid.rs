use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{GwsError, GwsResult};

/// Relative tolerance on axis spacing when checking uniformity.
const SPACING_TOLERANCE: f64 = 1e-6;

/// Absolute tolerance (degrees) when matching coordinates between grids.
pub const COORD_TOLERANCE: f64 = 1e-6;

// ── Longitude convention ─────────────────────────────────────────────────────

/// Longitude range convention used by a grid or a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LonConvention {
    /// −180 ≤ lon < 180
    Signed,
    /// 0 ≤ lon < 360
    Positive,
}

impl LonConvention {
    pub fn normalize(self, lon: f64) -> f64 {
        match self {
            LonConvention::Signed => {
                let l = (lon + 180.0).rem_euclid(360.0) - 180.0;
                if l >= 180.0 { l - 360.0 } else { l }
            }
            LonConvention::Positive => {
                let l = lon.rem_euclid(360.0);
                if l >= 360.0 { l - 360.0 } else { l }
            }
        }
    }
}

// ── GeoGrid ──────────────────────────────────────────────────────────────────

/// A regular lat/lon grid. Both axes are strictly increasing and uniformly spaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoGrid {
    lats: Vec<f64>,
    lons: Vec<f64>,
}

impl GeoGrid {
    pub fn new(lats: Vec<f64>, lons: Vec<f64>) -> GwsResult<Self> {
        check_axis("latitude", &lats)?;
        check_axis("longitude", &lons)?;
        Ok(Self { lats, lons })
    }

    pub fn lats(&self) -> &[f64] {
        &self.lats
    }

    pub fn lons(&self) -> &[f64] {
        &self.lons
    }

    pub fn n_lat(&self) -> usize {
        self.lats.len()
    }

    pub fn n_lon(&self) -> usize {
        self.lons.len()
    }

    /// Convention inferred from the axis: any value above 180 means 0..360.
    pub fn lon_convention(&self) -> LonConvention {
        if self.lons.iter().any(|&l| l > 180.0) {
            LonConvention::Positive
        } else {
            LonConvention::Signed
        }
    }

    pub fn nearest_lat_index(&self, lat: f64) -> usize {
        nearest_index(&self.lats, lat)
    }

    /// Nearest longitude node; `lon` is first brought into the grid's convention.
    pub fn nearest_lon_index(&self, lon: f64) -> usize {
        nearest_index(&self.lons, self.lon_convention().normalize(lon))
    }

    /// Nearest node to the point, or `None` when the point lies more than half
    /// a grid step beyond either axis. A longitude axis spanning the full
    /// circle covers every longitude.
    pub fn covering_node(&self, lat: f64, lon: f64) -> Option<(usize, usize)> {
        let lon_n = self.lon_convention().normalize(lon);
        let full_circle = self.lons.len() >= 2
            && ((axis_step(&self.lons) * self.lons.len() as f64) - 360.0).abs() < COORD_TOLERANCE;
        let lat_ok = within_half_step(&self.lats, lat);
        let lon_ok = full_circle || within_half_step(&self.lons, lon_n);
        (lat_ok && lon_ok).then(|| (self.nearest_lat_index(lat), self.nearest_lon_index(lon)))
    }

    /// Cell `[i, i+1) × [j, j+1)` enclosing the point, by linear scan.
    ///
    /// Returns `(lat_lo, lon_lo)`; the enclosing nodes are `lat_lo..=lat_lo+1`
    /// and `lon_lo..=lon_lo+1`.
    pub fn enclosing_cell(&self, lat: f64, lon: f64) -> GwsResult<(usize, usize)> {
        let lon_n = self.lon_convention().normalize(lon);
        let out = || GwsError::PointOutOfRange { lat, lon };
        let i = bracket(&self.lats, lat).ok_or_else(out)?;
        let j = bracket(&self.lons, lon_n).ok_or_else(out)?;
        Ok((i, j))
    }

    /// Rows of `self` whose latitudes are exactly those of `other`, in order.
    pub fn row_span_matching(&self, other: &GeoGrid) -> GwsResult<Range<usize>> {
        let first = other.lats[0];
        let start = self
            .lats
            .iter()
            .position(|&l| (l - first).abs() < COORD_TOLERANCE)
            .ok_or_else(|| {
                GwsError::invalid(format!("latitude {first} of the target grid is not on this grid"))
            })?;
        let end = start + other.n_lat();
        if end > self.n_lat() {
            return Err(GwsError::invalid(format!(
                "target grid needs rows {start}..{end}, grid has {}",
                self.n_lat()
            )));
        }
        let aligned = self.lats[start..end]
            .iter()
            .zip(&other.lats)
            .all(|(a, b)| (a - b).abs() < COORD_TOLERANCE);
        if !aligned {
            return Err(GwsError::invalid("latitude axes are not aligned"));
        }
        Ok(start..end)
    }

    pub fn subset_rows(&self, rows: Range<usize>) -> GwsResult<GeoGrid> {
        if rows.is_empty() || rows.end > self.n_lat() {
            return Err(GwsError::invalid(format!(
                "row range {rows:?} is outside 0..{}",
                self.n_lat()
            )));
        }
        GeoGrid::new(self.lats[rows].to_vec(), self.lons.clone())
    }

    /// Same grid with the longitude axis replaced.
    pub fn with_lons(&self, lons: Vec<f64>) -> GwsResult<GeoGrid> {
        GeoGrid::new(self.lats.clone(), lons)
    }

    pub fn same_axes(&self, other: &GeoGrid) -> bool {
        fn eq(a: &[f64], b: &[f64]) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < COORD_TOLERANCE)
        }
        eq(&self.lats, &other.lats) && eq(&self.lons, &other.lons)
    }
}

fn check_axis(name: &str, axis: &[f64]) -> GwsResult<()> {
    if axis.is_empty() {
        return Err(GwsError::invalid(format!("{name} axis is empty")));
    }
    if axis.iter().any(|v| !v.is_finite()) {
        return Err(GwsError::invalid(format!("{name} axis contains non-finite values")));
    }
    if axis.len() < 2 {
        return Ok(());
    }
    let step = axis[1] - axis[0];
    if step <= 0.0 {
        return Err(GwsError::invalid(format!("{name} axis is not strictly increasing")));
    }
    for w in axis.windows(2) {
        let d = w[1] - w[0];
        if d <= 0.0 {
            return Err(GwsError::invalid(format!("{name} axis is not strictly increasing")));
        }
        if ((d - step) / step).abs() > SPACING_TOLERANCE {
            return Err(GwsError::invalid(format!(
                "{name} axis spacing is not uniform ({d} vs {step})"
            )));
        }
    }
    Ok(())
}

fn nearest_index(axis: &[f64], v: f64) -> usize {
    axis.iter()
        .enumerate()
        .fold((0usize, f64::INFINITY), |(bi, bd), (i, &a)| {
            let d = (a - v).abs();
            if d < bd { (i, d) } else { (bi, bd) }
        })
        .0
}

fn axis_step(axis: &[f64]) -> f64 {
    if axis.len() < 2 { 0.0 } else { axis[1] - axis[0] }
}

fn within_half_step(axis: &[f64], v: f64) -> bool {
    let half = 0.5 * axis_step(axis) + COORD_TOLERANCE;
    match (axis.first(), axis.last()) {
        (Some(&lo), Some(&hi)) => v >= lo - half && v <= hi + half,
        _ => false,
    }
}

/// Index `i` with `axis[i] <= v < axis[i+1]`.
fn bracket(axis: &[f64], v: f64) -> Option<usize> {
    axis.windows(2).position(|w| w[0] <= v && v < w[1])
}
