//! Data fusion: satellite total water storage minus land-model soil and canopy
//! storage, as anomalies on a common grid and timeline.
//!
//! Steps, each a transform producing a new field:
//!   1. Land-model storage in cm EWT (canopy + top two soil layers)
//!   2. Land-model longitudes re-anchored onto the satellite convention
//!   3. Satellite centers averaged, scale-corrected, rows cut to land coverage
//!   4. Land model interpolated in time onto satellite epochs
//!   5. Anomalies w.r.t. the study-period mean; satellite − land
//!   6. Region inclusion mask
//!   7. Reference-cell time mask

use chrono::{Datelike, NaiveDate};
use tracing::{debug, info};

use crate::artifact::AnomalyCube;
use crate::calendar::{day_offset, days_to_dates, Source};
use crate::config::{FusionConfig, ReferenceCell};
use crate::error::{GwsError, GwsResult};
use crate::grid::{GeoGrid, LonConvention, COORD_TOLERANCE};
use crate::masked::{MaskedField3D, MaskedMap};
use crate::polygon::{inclusion_mask, InclusionMask, PolygonWithHoles};
use crate::sources::SourceBundle;
use crate::spline::{NaturalCubicSpline, MIN_KNOTS};

/// kg m⁻² of water → cm of equivalent water thickness (density 1000 kg m⁻³).
pub const KG_PER_M2_TO_CM: f64 = 0.1;

/// Satellite storage variable name in each center's bundle.
pub const GRACE_VARIABLE: &str = "lwe_thickness";
/// Scale factor variable name.
pub const SCALE_FACTOR_VARIABLE: &str = "SCALE_FACTOR";
/// Canopy interception storage variable name.
pub const CANOPY_VARIABLE: &str = "CanopInt_inst";

// ── Land-model storage ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoilLayer {
    Cm0To10,
    Cm10To40,
    Cm40To100,
    Cm100To200,
}

impl SoilLayer {
    pub const ALL: [SoilLayer; 4] =
        [SoilLayer::Cm0To10, SoilLayer::Cm10To40, SoilLayer::Cm40To100, SoilLayer::Cm100To200];

    pub fn variable(self) -> &'static str {
        match self {
            SoilLayer::Cm0To10 => "SoilMoi0_10cm_inst",
            SoilLayer::Cm10To40 => "SoilMoi10_40cm_inst",
            SoilLayer::Cm40To100 => "SoilMoi40_100cm_inst",
            SoilLayer::Cm100To200 => "SoilMoi100_200cm_inst",
        }
    }
}

/// Layers summed into land-model water storage. The two deep layers are left
/// out of the balance.
pub const INCLUDED_SOIL_LAYERS: [SoilLayer; 2] = [SoilLayer::Cm0To10, SoilLayer::Cm10To40];

/// Land-model storage components in kg m⁻².
#[derive(Debug, Clone)]
pub struct LandStorageComponents {
    pub canopy: MaskedField3D,
    pub soil: Vec<(SoilLayer, MaskedField3D)>,
}

impl LandStorageComponents {
    /// Read canopy and whichever soil layers the bundle carries.
    pub fn from_bundle(bundle: &SourceBundle) -> GwsResult<Self> {
        let canopy = bundle.field(CANOPY_VARIABLE)?;
        let soil = SoilLayer::ALL
            .into_iter()
            .filter(|l| bundle.variables.contains_key(l.variable()))
            .map(|l| Ok::<_, GwsError>((l, bundle.field(l.variable())?)))
            .collect::<GwsResult<Vec<_>>>()?;
        Ok(Self { canopy, soil })
    }

    /// Canopy plus the included soil layers, in cm EWT.
    pub fn water_storage(&self) -> GwsResult<MaskedField3D> {
        let mut total = self.canopy.scale(KG_PER_M2_TO_CM);
        for layer in INCLUDED_SOIL_LAYERS {
            let (_, field) = self
                .soil
                .iter()
                .find(|(l, _)| *l == layer)
                .ok_or_else(|| GwsError::invalid(format!("soil layer `{}` missing", layer.variable())))?;
            total = total.add(&field.scale(KG_PER_M2_TO_CM))?;
        }
        Ok(total)
    }
}

// ── Grid alignment ───────────────────────────────────────────────────────────

/// Rotate longitude columns so the axis matches `target_lons` exactly.
///
/// The source axis is rewritten in the target's convention and rotated to
/// start at its smallest longitude.
pub fn reanchor_longitudes(
    field: &MaskedField3D,
    grid: &GeoGrid,
    target_lons: &[f64],
) -> GwsResult<(MaskedField3D, GeoGrid)> {
    if field.n_lon != grid.n_lon() || field.n_lat != grid.n_lat() {
        return Err(GwsError::invalid("field does not match its grid"));
    }
    let conv = if target_lons.iter().any(|&l| l > 180.0) {
        LonConvention::Positive
    } else {
        LonConvention::Signed
    };
    let mut lons: Vec<f64> = grid.lons().iter().map(|&l| conv.normalize(l)).collect();
    let shift = lons
        .iter()
        .enumerate()
        .fold((0usize, f64::INFINITY), |(bi, bv), (i, &v)| if v < bv { (i, v) } else { (bi, bv) })
        .0;
    lons.rotate_left(shift);

    let matches = lons.len() == target_lons.len()
        && lons.iter().zip(target_lons).all(|(a, b)| (a - b).abs() < COORD_TOLERANCE);
    if !matches {
        return Err(GwsError::invalid(
            "re-anchored longitudes do not match the target grid",
        ));
    }
    debug!(shift, "land-model longitudes re-anchored");
    Ok((field.rotate_lon(shift), grid.with_lons(target_lons.to_vec())?))
}

/// Bring a scale-factor map onto `target`: unchanged when the axes agree,
/// otherwise by nearest node.
pub fn align_scale_factors(
    factors: &MaskedMap,
    factor_grid: &GeoGrid,
    target: &GeoGrid,
) -> GwsResult<MaskedMap> {
    if factors.n_lat != factor_grid.n_lat() || factors.n_lon != factor_grid.n_lon() {
        return Err(GwsError::invalid("scale factors do not match their grid"));
    }
    if factor_grid.same_axes(target) {
        return Ok(factors.clone());
    }
    debug!("scale factors regridded by nearest node");
    let rows: Vec<usize> = target.lats().iter().map(|&l| factor_grid.nearest_lat_index(l)).collect();
    let cols: Vec<usize> = target.lons().iter().map(|&l| factor_grid.nearest_lon_index(l)).collect();
    let mut out = MaskedMap::masked_all(target.n_lat(), target.n_lon());
    for (i, &r) in rows.iter().enumerate() {
        for (j, &c) in cols.iter().enumerate() {
            let k = i * target.n_lon() + j;
            if let Some(v) = factors.get(r, c) {
                out.data[k] = v;
                out.mask[k] = false;
            }
        }
    }
    Ok(out)
}

// ── Satellite storage ────────────────────────────────────────────────────────

/// Plain mean of the three processing centers: `(a + b + c) / 3`.
///
/// A cell missing in any center is missing in the result; the remaining
/// centers are not re-weighted.
pub fn average_centers(
    a: &MaskedField3D,
    b: &MaskedField3D,
    c: &MaskedField3D,
) -> GwsResult<MaskedField3D> {
    let mut sum = a.add(b)?.add(c)?;
    for (v, &m) in sum.data.iter_mut().zip(&sum.mask) {
        if !m {
            *v /= 3.0;
        }
    }
    Ok(sum)
}

/// Multiply every epoch by the (aligned) scale factors.
pub fn apply_scale_factors(storage: &MaskedField3D, factors: &MaskedMap) -> GwsResult<MaskedField3D> {
    storage.mul_map(factors)
}

// ── Temporal interpolation ───────────────────────────────────────────────────

/// Land-model day offset matched to each satellite epoch.
///
/// Takes the latest land sample on or before the epoch and adds the
/// day-of-month difference between the two dates.
pub fn composed_offsets(grace_dates: &[NaiveDate], gldas_dates: &[NaiveDate]) -> GwsResult<Vec<f64>> {
    let epoch = Source::Gldas.epoch();
    grace_dates
        .iter()
        .map(|&g| {
            let ind = gldas_dates.iter().rposition(|&d| d <= g).ok_or_else(|| {
                GwsError::invalid(format!("satellite epoch {g} precedes the first land-model sample"))
            })?;
            let land = gldas_dates[ind];
            let days = g.day() as i64 - land.day() as i64;
            Ok((day_offset(land, epoch) + days) as f64)
        })
        .collect()
}

/// Resolve a reference cell to the nearest grid node. A cell off the grid is
/// rejected rather than snapped to an edge node.
pub fn reference_indices(grid: &GeoGrid, cell: ReferenceCell) -> GwsResult<(usize, usize)> {
    grid.covering_node(cell.lat, cell.lon).ok_or_else(|| {
        GwsError::invalid(format!(
            "reference cell (lat={}, lon={}) lies outside the fused grid",
            cell.lat, cell.lon
        ))
    })
}

/// Interpolate land-model storage onto the satellite epochs.
///
/// The result is invalid where the satellite reference cell is invalid in
/// time, or where the land model's first step is invalid in space.
pub fn temporal_interpolation(
    grace_dates: &[NaiveDate],
    gldas_dates: &[NaiveDate],
    grace_ws: &MaskedField3D,
    gldas_ws: &MaskedField3D,
    reference: (usize, usize),
) -> GwsResult<MaskedField3D> {
    if gldas_dates.len() < MIN_KNOTS {
        return Err(GwsError::InsufficientSamples { required: MIN_KNOTS, found: gldas_dates.len() });
    }
    if grace_dates.len() != grace_ws.n_time || gldas_dates.len() != gldas_ws.n_time {
        return Err(GwsError::invalid("time axes do not match their fields"));
    }
    if grace_ws.n_lat != gldas_ws.n_lat || grace_ws.n_lon != gldas_ws.n_lon {
        return Err(GwsError::invalid(format!(
            "satellite plane {}×{} vs land-model plane {}×{}",
            grace_ws.n_lat, grace_ws.n_lon, gldas_ws.n_lat, gldas_ws.n_lon
        )));
    }
    let (ri, rj) = reference;
    if ri >= grace_ws.n_lat || rj >= grace_ws.n_lon {
        return Err(GwsError::invalid("reference cell outside the grid"));
    }

    let epoch = Source::Gldas.epoch();
    let knots: Vec<f64> = gldas_dates.iter().map(|&d| day_offset(d, epoch) as f64).collect();
    let xs = composed_offsets(grace_dates, gldas_dates)?;

    let spline = NaturalCubicSpline::new(&knots)?;
    let plane = gldas_ws.plane();
    let mut data = spline.interpolate_columns(&gldas_ws.data, plane, &xs)?;

    let time_mask = grace_ws.time_mask_at(ri, rj);
    let space_mask = gldas_ws.spatial_mask_at(0);
    let mut mask = vec![false; data.len()];
    for (t, &tm) in time_mask.iter().enumerate() {
        for p in 0..plane {
            let k = t * plane + p;
            mask[k] = tm || space_mask[p];
            if mask[k] {
                data[k] = 0.0;
            }
        }
    }
    MaskedField3D::new(data, mask, grace_ws.n_time, grace_ws.n_lat, grace_ws.n_lon)
}

// ── Anomalies and masking ────────────────────────────────────────────────────

/// Storage anomaly relative to the field's own study-period mean.
pub fn anomaly(field: &MaskedField3D) -> MaskedField3D {
    field.subtract_temporal_mean()
}

/// Satellite anomaly minus land-model anomaly.
pub fn groundwater_anomaly(
    grace_ws: &MaskedField3D,
    gldas_interp: &MaskedField3D,
) -> GwsResult<MaskedField3D> {
    anomaly(grace_ws).sub(&anomaly(gldas_interp))
}

/// Invalidate cells outside the region, on every epoch.
pub fn apply_inclusion(mut field: MaskedField3D, mask: &InclusionMask) -> GwsResult<MaskedField3D> {
    if mask.n_lat != field.n_lat || mask.n_lon != field.n_lon {
        return Err(GwsError::invalid("inclusion mask does not match the field plane"));
    }
    field.or_spatial_mask(&mask.exclusion())?;
    Ok(field)
}

/// Invalidate whole epochs where the satellite reference cell is invalid.
pub fn consolidate_mask(
    mut field: MaskedField3D,
    grace_ws: &MaskedField3D,
    reference: (usize, usize),
) -> GwsResult<MaskedField3D> {
    field.or_temporal_mask(&grace_ws.time_mask_at(reference.0, reference.1))?;
    Ok(field)
}

// ── Orchestration ────────────────────────────────────────────────────────────

/// Everything the fusion stage reads.
#[derive(Debug, Clone)]
pub struct FusionInputs {
    /// Satellite day offsets (GRACE epoch), shared by the three centers.
    pub grace_time: Vec<f64>,
    pub grace_grid: GeoGrid,
    /// The three processing centers, on `grace_grid`.
    pub centers: [MaskedField3D; 3],
    pub scale_factors: MaskedMap,
    pub scale_grid: GeoGrid,
    /// Land-model day offsets (GLDAS epoch).
    pub gldas_time: Vec<f64>,
    pub gldas_grid: GeoGrid,
    pub land: LandStorageComponents,
    pub region: PolygonWithHoles,
}

impl FusionInputs {
    /// Assemble inputs from bundles. The satellite time axis and grid come from
    /// the first center.
    pub fn from_bundles(
        centers: [&SourceBundle; 3],
        scale: &SourceBundle,
        land: &SourceBundle,
        region: PolygonWithHoles,
    ) -> GwsResult<Self> {
        let grace_grid = centers[0].grid()?;
        for c in &centers[1..] {
            if !c.grid()?.same_axes(&grace_grid) {
                return Err(GwsError::invalid("processing centers are on different grids"));
            }
            if c.time != centers[0].time {
                return Err(GwsError::invalid("processing centers disagree on their time axis"));
            }
        }
        Ok(Self {
            grace_time: centers[0].time.clone(),
            grace_grid,
            centers: [
                centers[0].field(GRACE_VARIABLE)?,
                centers[1].field(GRACE_VARIABLE)?,
                centers[2].field(GRACE_VARIABLE)?,
            ],
            scale_factors: scale.map(SCALE_FACTOR_VARIABLE)?,
            scale_grid: scale.grid()?,
            gldas_time: land.time.clone(),
            gldas_grid: land.grid()?,
            land: LandStorageComponents::from_bundle(land)?,
            region,
        })
    }
}

/// Run the whole fusion chain and package the groundwater anomaly cube.
pub fn fuse(inputs: &FusionInputs, config: &FusionConfig) -> GwsResult<AnomalyCube> {
    // ── 1. Land-model storage ───────────────────────────────────────────────
    let gldas_ws = inputs.land.water_storage()?;
    info!(epochs = gldas_ws.n_time, "land-model storage assembled");

    // ── 2. Longitude re-anchoring ───────────────────────────────────────────
    let (gldas_ws, gldas_grid) =
        reanchor_longitudes(&gldas_ws, &inputs.gldas_grid, inputs.grace_grid.lons())?;

    // ── 3. Satellite storage ────────────────────────────────────────────────
    let [csr, jpl, gfz] = &inputs.centers;
    let average = average_centers(csr, jpl, gfz)?;
    let factors = align_scale_factors(&inputs.scale_factors, &inputs.scale_grid, &inputs.grace_grid)?;
    let corrected = apply_scale_factors(&average, &factors)?;
    let rows = match config.grace_lat_rows {
        Some((start, end)) => start..end,
        None => inputs.grace_grid.row_span_matching(&gldas_grid)?,
    };
    let grace_ws = corrected.subset_rows(rows.clone())?;
    let grid = inputs.grace_grid.subset_rows(rows.clone())?;
    if !grid.same_axes(&gldas_grid) {
        return Err(GwsError::invalid(format!(
            "satellite rows {rows:?} do not line up with the land-model grid"
        )));
    }
    info!(epochs = grace_ws.n_time, rows = ?rows, "satellite storage corrected");

    // ── 4. Temporal interpolation ───────────────────────────────────────────
    let grace_dates = days_to_dates(&inputs.grace_time, Source::Grace.epoch())?;
    let gldas_dates = days_to_dates(&inputs.gldas_time, Source::Gldas.epoch())?;
    let reference = reference_indices(&grid, config.reference_cell)?;
    debug!(lat_index = reference.0, lon_index = reference.1, "reference cell resolved");
    let gldas_interp =
        temporal_interpolation(&grace_dates, &gldas_dates, &grace_ws, &gldas_ws, reference)?;

    // ── 5. Anomalies ────────────────────────────────────────────────────────
    let dgw = groundwater_anomaly(&grace_ws, &gldas_interp)?;

    // ── 6. Region ───────────────────────────────────────────────────────────
    let region = inclusion_mask(&grid, &inputs.region, &config.inclusion);
    info!(cells = region.count(), "region inclusion mask built");
    let dgw = apply_inclusion(dgw, &region)?;

    // ── 7. Reference-cell time mask ─────────────────────────────────────────
    let dgw = consolidate_mask(dgw, &grace_ws, reference)?;

    AnomalyCube::new(dgw, inputs.grace_time.clone(), &grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polygon::Ring;
    use approx::assert_abs_diff_eq;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn constant(v: f64, t: usize, y: usize, x: usize) -> MaskedField3D {
        MaskedField3D::new(vec![v; t * y * x], vec![false; t * y * x], t, y, x).unwrap()
    }

    #[test]
    fn land_storage_sums_canopy_and_top_two_layers() {
        let land = LandStorageComponents {
            canopy: constant(1.0, 1, 1, 2),
            soil: vec![
                (SoilLayer::Cm0To10, constant(20.0, 1, 1, 2)),
                (SoilLayer::Cm10To40, constant(70.0, 1, 1, 2)),
                (SoilLayer::Cm40To100, constant(500.0, 1, 1, 2)),
                (SoilLayer::Cm100To200, constant(900.0, 1, 1, 2)),
            ],
        };
        let ws = land.water_storage().unwrap();
        assert_abs_diff_eq!(ws.get(0, 0, 1).unwrap(), 9.1, epsilon = 1e-12);
    }

    #[test]
    fn land_storage_needs_top_layers() {
        let land = LandStorageComponents {
            canopy: constant(1.0, 1, 1, 1),
            soil: vec![(SoilLayer::Cm0To10, constant(1.0, 1, 1, 1))],
        };
        assert!(matches!(land.water_storage(), Err(GwsError::InvalidInput(_))));
    }

    #[test]
    fn signed_longitudes_reanchor_onto_positive_axis() {
        let lons: Vec<f64> = (0..8).map(|i| -157.5 + 45.0 * i as f64).collect();
        let target: Vec<f64> = (0..8).map(|i| 22.5 + 45.0 * i as f64).collect();
        let grid = GeoGrid::new(vec![0.0], lons.clone()).unwrap();
        let data: Vec<f64> = lons.clone();
        let f = MaskedField3D::new(data, vec![false; 8], 1, 1, 8).unwrap();
        let (r, g) = reanchor_longitudes(&f, &grid, &target).unwrap();
        assert_eq!(g.lons(), target.as_slice());
        // Column 0 now holds the value that sat at +22.5°.
        assert_eq!(r.get(0, 0, 0), Some(22.5));
        assert_eq!(r.get(0, 0, 4), Some(-157.5));
    }

    #[test]
    fn reanchoring_onto_a_different_axis_fails() {
        let grid = GeoGrid::new(vec![0.0], vec![-90.0, 0.0, 90.0]).unwrap();
        let f = constant(0.0, 1, 1, 3);
        assert!(reanchor_longitudes(&f, &grid, &[0.5, 120.5, 240.5]).is_err());
    }

    #[test]
    fn centers_average_without_reweighting() {
        let a = MaskedField3D::new(vec![3.0, 3.0], vec![false, false], 1, 1, 2).unwrap();
        let b = MaskedField3D::new(vec![6.0, 6.0], vec![false, true], 1, 1, 2).unwrap();
        let c = MaskedField3D::new(vec![9.0, 9.0], vec![false, false], 1, 1, 2).unwrap();
        let avg = average_centers(&a, &b, &c).unwrap();
        assert_eq!(avg.get(0, 0, 0), Some(6.0));
        assert_eq!(avg.get(0, 0, 1), None);
    }

    #[test]
    fn scale_factors_fall_back_to_nearest_node() {
        let coarse = GeoGrid::new(vec![-1.0, 1.0], vec![1.0, 3.0]).unwrap();
        let fine = GeoGrid::new(vec![-1.5, -0.5, 0.5, 1.5], vec![0.5, 1.5, 2.5, 3.5]).unwrap();
        let f = MaskedMap::new(vec![1.0, 2.0, 3.0, 4.0], vec![false, false, false, true], 2, 2).unwrap();
        let out = align_scale_factors(&f, &coarse, &fine).unwrap();
        assert_eq!(out.get(0, 0), Some(1.0));
        assert_eq!(out.get(0, 3), Some(2.0));
        assert_eq!(out.get(3, 0), Some(3.0));
        assert!(out.is_masked(3, 3));
    }

    #[test]
    fn composed_offsets_add_day_of_month_difference() {
        let gldas = [ymd(2002, 1, 1), ymd(2002, 2, 1), ymd(2002, 3, 1)];
        let grace = [ymd(2002, 1, 16), ymd(2002, 2, 15)];
        let xs = composed_offsets(&grace, &gldas).unwrap();
        let epoch = Source::Gldas.epoch();
        assert_eq!(xs[0], (day_offset(gldas[0], epoch) + 15) as f64);
        assert_eq!(xs[1], (day_offset(gldas[1], epoch) + 14) as f64);
        assert!(composed_offsets(&[ymd(2001, 12, 1)], &gldas).is_err());
    }

    #[test]
    fn interpolation_needs_two_land_samples() {
        let grace_dates = [ymd(2002, 1, 16)];
        let grace = constant(1.0, 1, 1, 1);

        let one = [ymd(2002, 1, 1)];
        let err = temporal_interpolation(&grace_dates, &one, &grace, &constant(1.0, 1, 1, 1), (0, 0));
        assert!(matches!(err, Err(GwsError::InsufficientSamples { required: 2, found: 1 })));

        let two = [ymd(2002, 1, 1), ymd(2002, 1, 31)];
        let land = MaskedField3D::new(vec![0.0, 30.0], vec![false; 2], 2, 1, 1).unwrap();
        let out = temporal_interpolation(&grace_dates, &two, &grace, &land, (0, 0)).unwrap();
        assert_abs_diff_eq!(out.get(0, 0, 0).unwrap(), 15.0, epsilon = 1e-9);
    }

    #[test]
    fn interpolation_combines_time_and_space_masks() {
        let gldas_dates = [ymd(2002, 1, 1), ymd(2002, 2, 1), ymd(2002, 3, 1)];
        let grace_dates = [ymd(2002, 1, 10), ymd(2002, 2, 10)];
        // 1×2 plane; land cell 1 invalid at the first step only.
        let land = MaskedField3D::new(
            vec![1.0, 0.0, 2.0, 2.0, 3.0, 3.0],
            vec![false, true, false, false, false, false],
            3,
            1,
            2,
        )
        .unwrap();
        // Reference cell (0, 0) invalid on the second satellite epoch.
        let grace = MaskedField3D::new(vec![0.0; 4], vec![false, false, true, false], 2, 1, 2).unwrap();
        let out = temporal_interpolation(&grace_dates, &gldas_dates, &grace, &land, (0, 0)).unwrap();
        assert!(out.get(0, 0, 0).is_some());
        assert!(out.get(0, 0, 1).is_none());
        assert!(out.get(1, 0, 0).is_none());
        assert!(out.get(1, 0, 1).is_none());
    }

    fn square_region() -> PolygonWithHoles {
        PolygonWithHoles::new(
            Ring(vec![[-10.0, -10.0], [10.0, -10.0], [10.0, 10.0], [-10.0, 10.0]]),
            vec![],
        )
        .unwrap()
    }

    /// Satellite grid on 0..360 with one extra southern row; land model on
    /// -180..180 covering the top three rows. Satellite epochs 2002-01-16,
    /// 2002-02-15 and 2002-03-16 against monthly land samples from 2002-01-01.
    fn small_inputs() -> FusionInputs {
        let grace_grid = GeoGrid::new(vec![-1.5, -0.5, 0.5, 1.5], quarter(0.5)).unwrap();
        let gldas_grid = GeoGrid::new(vec![-0.5, 0.5, 1.5], quarter(-179.5)).unwrap();
        let grace_time = vec![15.0, 45.0, 74.0];
        let gldas_time: Vec<f64> = (0..5).map(|m| 306.0 + 30.0 * m as f64).collect();
        let (nt, nl) = (grace_time.len(), gldas_time.len());

        FusionInputs {
            grace_time,
            grace_grid: grace_grid.clone(),
            centers: [constant(3.0, nt, 4, 4), constant(6.0, nt, 4, 4), constant(9.0, nt, 4, 4)],
            scale_factors: MaskedMap::new(vec![1.0; 16], vec![false; 16], 4, 4).unwrap(),
            scale_grid: grace_grid,
            gldas_time,
            gldas_grid,
            land: LandStorageComponents {
                canopy: constant(10.0, nl, 3, 4),
                soil: vec![
                    (SoilLayer::Cm0To10, constant(10.0, nl, 3, 4)),
                    (SoilLayer::Cm10To40, constant(10.0, nl, 3, 4)),
                ],
            },
            region: square_region(),
        }
    }

    fn quarter(start: f64) -> Vec<f64> {
        (0..4).map(|i| start + 90.0 * i as f64).collect()
    }

    fn near_origin() -> FusionConfig {
        FusionConfig {
            reference_cell: ReferenceCell { lat: 0.5, lon: 0.5 },
            ..FusionConfig::default()
        }
    }

    #[test]
    fn fuse_end_to_end_on_a_small_grid() {
        let cube = fuse(&small_inputs(), &near_origin()).unwrap();
        assert_eq!(cube.lat, vec![-0.5, 0.5, 1.5]);
        assert_eq!(cube.lon, quarter(0.5));
        assert_eq!(cube.time.len(), 3);
        let field = cube.field().unwrap();
        // Constant inputs give zero anomalies inside the region.
        for t in 0..3 {
            assert_abs_diff_eq!(field.get(t, 1, 0).unwrap(), 0.0, epsilon = 1e-9);
        }
        // Columns far from the region are excluded.
        assert!(field.get(0, 1, 1).is_none());
        assert!(field.get(0, 1, 3).is_none());
    }

    #[test]
    fn invalid_reference_epoch_masks_the_whole_slice() {
        let mut inputs = small_inputs();
        // Satellite row 2 (lat 0.5), column 0 is the reference node.
        let k = inputs.centers[0].index(1, 2, 0);
        inputs.centers[0].mask[k] = true;

        let field = fuse(&inputs, &near_origin()).unwrap().field().unwrap();
        assert!(field.spatial_mask_at(1).iter().all(|&m| m));
        for t in [0, 2] {
            assert_abs_diff_eq!(field.get(t, 1, 0).unwrap(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn reference_cell_off_the_grid_is_rejected() {
        let err = fuse(&small_inputs(), &FusionConfig::default()).unwrap_err();
        assert!(matches!(err, GwsError::InvalidInput(_)));

        let grid = GeoGrid::new(vec![-0.5, 0.5, 1.5], quarter(0.5)).unwrap();
        assert!(reference_indices(&grid, ReferenceCell::default()).is_err());
        assert_eq!(reference_indices(&grid, ReferenceCell { lat: 1.2, lon: 95.0 }).unwrap(), (2, 1));
    }

    fn bundle(time: Vec<f64>) -> SourceBundle {
        let n = time.len() * 4;
        SourceBundle {
            time,
            lat: vec![-0.5, 0.5],
            lon: vec![0.5, 1.5],
            fill_value: -99999.0,
            variables: [
                (GRACE_VARIABLE.to_string(), vec![1.0; n]),
                (CANOPY_VARIABLE.to_string(), vec![1.0; n]),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn centers_must_share_a_time_axis() {
        let a = bundle(vec![15.0, 45.0]);
        let b = bundle(vec![15.0, 46.0]);
        let mut scale = bundle(vec![]);
        scale.variables.insert(SCALE_FACTOR_VARIABLE.to_string(), vec![1.0; 4]);
        let land = bundle(vec![306.0, 336.0]);

        let err = FusionInputs::from_bundles([&a, &b, &a], &scale, &land, square_region()).unwrap_err();
        assert!(matches!(err, GwsError::InvalidInput(ref m) if m.contains("time axis")));
        assert!(FusionInputs::from_bundles([&a, &a, &a], &scale, &land, square_region()).is_ok());
    }
}
