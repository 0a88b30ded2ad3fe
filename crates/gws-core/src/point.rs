//! Point query: inverse-distance weighting from the four enclosing grid nodes,
//! summary statistics and a linear trend against ordinal day numbers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tracing::debug;

use crate::calendar::ordinal_day;
use crate::error::{GwsError, GwsResult};
use crate::grid::GeoGrid;
use crate::masked::MaskedField3D;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Planar distance with one constant km-per-degree scale on both axes.
pub fn flat_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let km_per_deg = TAU * EARTH_RADIUS_KM / 360.0;
    ((lat2 - lat1).powi(2) + (lon2 - lon1).powi(2)).sqrt() * km_per_deg
}

// ── Corners ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Corner {
    /// (lat_lo, lon_lo)
    SouthWest,
    /// (lat_hi, lon_lo)
    NorthWest,
    /// (lat_lo, lon_hi)
    SouthEast,
    /// (lat_hi, lon_hi)
    NorthEast,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CornerNode {
    pub corner: Corner,
    pub lat_index: usize,
    pub lon_index: usize,
    pub distance_km: f64,
    /// Invalid at every time step; excluded from all weighting.
    pub fully_masked: bool,
}

impl CornerNode {
    pub fn weight(&self) -> f64 {
        if self.fully_masked {
            0.0
        } else {
            1.0 / self.distance_km
        }
    }
}

/// The four nodes around a query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CornerWeights {
    pub lat: f64,
    pub lon: f64,
    pub corners: [CornerNode; 4],
}

impl CornerWeights {
    /// Locate the enclosing cell and measure distances to its nodes.
    ///
    /// A query exactly on a node gives a zero distance and an infinite weight;
    /// that case is not handled.
    pub fn locate(field: &MaskedField3D, grid: &GeoGrid, lat: f64, lon: f64) -> GwsResult<Self> {
        if field.n_lat != grid.n_lat() || field.n_lon != grid.n_lon() {
            return Err(GwsError::invalid("field does not match its grid"));
        }
        let (i, j) = grid.enclosing_cell(lat, lon)?;
        let lon_n = grid.lon_convention().normalize(lon);
        let node = |corner, lat_index: usize, lon_index: usize| {
            let fully_masked = field.time_mask_at(lat_index, lon_index).iter().all(|&m| m);
            CornerNode {
                corner,
                lat_index,
                lon_index,
                distance_km: flat_distance_km(lat, lon_n, grid.lats()[lat_index], grid.lons()[lon_index]),
                fully_masked,
            }
        };
        let corners = [
            node(Corner::SouthWest, i, j),
            node(Corner::NorthWest, i + 1, j),
            node(Corner::SouthEast, i, j + 1),
            node(Corner::NorthEast, i + 1, j + 1),
        ];
        if corners.iter().all(|c| c.fully_masked) {
            return Err(GwsError::NoDataAtPoint { lat, lon });
        }
        for c in corners.iter().filter(|c| c.fully_masked) {
            debug!(corner = ?c.corner, "corner has no valid samples and is excluded");
        }
        Ok(Self { lat, lon, corners })
    }

    /// Weights over the non-excluded corners, summing to 1.
    pub fn normalized(&self) -> [f64; 4] {
        let total: f64 = self.corners.iter().map(CornerNode::weight).sum();
        self.corners.map(|c| c.weight() / total)
    }
}

// ── Series ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSeries {
    pub dates: Vec<NaiveDate>,
    /// `None` where no corner is valid.
    pub values: Vec<Option<f64>>,
}

impl PointSeries {
    pub fn valid(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates.iter().zip(&self.values).filter_map(|(&d, v)| v.map(|v| (d, v)))
    }
}

/// Weighted series at a point. Each step uses only the corners valid at that
/// step, renormalizing their weights.
pub fn point_series(
    field: &MaskedField3D,
    grid: &GeoGrid,
    dates: &[NaiveDate],
    lat: f64,
    lon: f64,
) -> GwsResult<(PointSeries, CornerWeights)> {
    if dates.len() != field.n_time {
        return Err(GwsError::invalid(format!(
            "{} dates for a field with {} time steps",
            dates.len(),
            field.n_time
        )));
    }
    let weights = CornerWeights::locate(field, grid, lat, lon)?;
    let corner_series: Vec<(f64, Vec<Option<f64>>)> = weights
        .corners
        .iter()
        .filter(|c| !c.fully_masked)
        .map(|c| (c.weight(), field.time_series(c.lat_index, c.lon_index)))
        .collect();
    let values = (0..field.n_time)
        .map(|t| {
            let (num, den) = corner_series
                .iter()
                .filter_map(|(w, s)| s[t].map(|v| (v, *w)))
                .fold((0.0, 0.0), |(n, d), (v, w)| (n + v * w, d + w));
            (den > 0.0).then(|| num / den)
        })
        .collect();
    Ok((PointSeries { dates: dates.to_vec(), values }, weights))
}

// ── Statistics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub mean: f64,
    pub median: f64,
    pub valid: usize,
}

impl SeriesSummary {
    /// `None` if the series has no valid sample.
    pub fn of(series: &PointSeries) -> Option<Self> {
        let mut v: Vec<f64> = series.valid().map(|(_, v)| v).collect();
        if v.is_empty() {
            return None;
        }
        v.sort_by(f64::total_cmp);
        let n = v.len();
        let median = if n % 2 == 1 { v[n / 2] } else { 0.5 * (v[n / 2 - 1] + v[n / 2]) };
        let mean = v.iter().sum::<f64>() / n as f64;
        Some(Self { mean, median, valid: n })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendFit {
    pub slope_per_day: f64,
    pub slope_per_year: f64,
    /// Value at ordinal day 0.
    pub intercept: f64,
    pub r_squared: f64,
}

/// Ordinary least squares of value against ordinal day over valid samples.
pub fn fit_trend(series: &PointSeries) -> GwsResult<TrendFit> {
    let pts: Vec<(f64, f64)> = series.valid().map(|(d, v)| (ordinal_day(d) as f64, v)).collect();
    let n = pts.len();
    if n < 2 {
        return Err(GwsError::InsufficientSamples { required: 2, found: n });
    }
    let mean_x = pts.iter().map(|p| p.0).sum::<f64>() / n as f64;
    let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / n as f64;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for &(x, y) in &pts {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx == 0.0 {
        return Err(GwsError::invalid("all valid samples fall on the same day"));
    }
    let slope = sxy / sxx;
    let r_squared = if syy > 0.0 { (sxy * sxy) / (sxx * syy) } else { 1.0 };
    Ok(TrendFit {
        slope_per_day: slope,
        slope_per_year: slope * 365.0,
        intercept: mean_y - slope * mean_x,
        r_squared,
    })
}
