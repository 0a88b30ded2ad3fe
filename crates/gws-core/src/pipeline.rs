//! Typed pipeline stages.
//!
//! Each stage consumes an immutable input and produces a new output. The
//! serialized artifacts between stages are the checkpoints that let the
//! downstream tools run without repeating the fusion.

use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregation::{annual_means, climatology, Climatology};
use crate::artifact::AnomalyCube;
use crate::config::FusionConfig;
use crate::error::{GwsError, GwsResult};
use crate::fusion::{fuse, FusionInputs};
use crate::masked::{MaskedField3D, MaskedMap};
use crate::point::{fit_trend, point_series, CornerWeights, PointSeries, SeriesSummary, TrendFit};

pub trait Stage {
    /// Name used in logs and in `StageFailed`.
    const NAME: &'static str;
    type Input;
    type Output;

    fn run(&self, input: &Self::Input) -> GwsResult<Self::Output>;
}

/// Run a stage, logging its duration and tagging any failure with its name.
pub fn run_stage<S: Stage>(stage: &S, input: &S::Input) -> GwsResult<S::Output> {
    info!(stage = S::NAME, "stage started");
    let t = Instant::now();
    let out = stage.run(input).map_err(|e| GwsError::StageFailed {
        stage: S::NAME,
        source: Box::new(e),
    })?;
    info!(stage = S::NAME, elapsed_ms = t.elapsed().as_millis() as u64, "stage finished");
    Ok(out)
}

// ── Stages ───────────────────────────────────────────────────────────────────

pub struct FusionStage {
    pub config: FusionConfig,
}

impl Stage for FusionStage {
    const NAME: &'static str = "fusion";
    type Input = FusionInputs;
    type Output = AnomalyCube;

    fn run(&self, input: &FusionInputs) -> GwsResult<AnomalyCube> {
        fuse(input, &self.config)
    }
}

pub struct ClimatologyStage;

impl Stage for ClimatologyStage {
    const NAME: &'static str = "climatology";
    type Input = AnomalyCube;
    type Output = Climatology;

    fn run(&self, cube: &AnomalyCube) -> GwsResult<Climatology> {
        climatology(&cube.field()?, &cube.dates()?)
    }
}

pub struct AnnualInput {
    pub deviation: MaskedField3D,
    pub dates: Vec<NaiveDate>,
}

pub struct AnnualStage {
    pub years: Vec<i32>,
}

impl Stage for AnnualStage {
    const NAME: &'static str = "annual";
    type Input = AnnualInput;
    type Output = Vec<(i32, MaskedMap)>;

    fn run(&self, input: &AnnualInput) -> GwsResult<Vec<(i32, MaskedMap)>> {
        annual_means(&input.deviation, &input.dates, &self.years)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointReport {
    pub lat: f64,
    pub lon: f64,
    pub weights: CornerWeights,
    pub summary: Option<SeriesSummary>,
    pub trend: TrendFit,
    pub series: PointSeries,
}

pub struct PointQueryStage {
    pub lat: f64,
    pub lon: f64,
}

impl Stage for PointQueryStage {
    const NAME: &'static str = "point_query";
    type Input = AnomalyCube;
    type Output = PointReport;

    fn run(&self, cube: &AnomalyCube) -> GwsResult<PointReport> {
        let (series, weights) =
            point_series(&cube.field()?, &cube.grid()?, &cube.dates()?, self.lat, self.lon)?;
        let trend = fit_trend(&series)?;
        Ok(PointReport {
            lat: self.lat,
            lon: self.lon,
            weights,
            summary: SeriesSummary::of(&series),
            trend,
            series,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GeoGrid;

    fn cube(mask_all: bool) -> AnomalyCube {
        let n = 4 * 2 * 2;
        let data: Vec<f64> = (0..n).map(|k| (k / 4) as f64).collect();
        let field = MaskedField3D::new(data, vec![mask_all; n], 4, 2, 2).unwrap();
        let grid = GeoGrid::new(vec![-35.5, -34.5], vec![301.5, 302.5]).unwrap();
        AnomalyCube::new(field, vec![15.0, 45.0, 74.0, 105.0], &grid).unwrap()
    }

    #[test]
    fn point_stage_reports_trend() {
        let report = run_stage(&PointQueryStage { lat: -35.1, lon: 302.2 }, &cube(false)).unwrap();
        assert_eq!(report.series.values.len(), 4);
        assert!(report.trend.slope_per_day > 0.0);
        assert_eq!(report.summary.map(|s| s.valid), Some(4));
    }

    #[test]
    fn failures_carry_the_stage_name() {
        let err = run_stage(&PointQueryStage { lat: -35.1, lon: 302.2 }, &cube(true)).unwrap_err();
        match &err {
            GwsError::StageFailed { stage, .. } => assert_eq!(*stage, "point_query"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(err.root(), GwsError::NoDataAtPoint { .. }));
    }

    #[test]
    fn climatology_stage_keeps_time_axis() {
        let clim = run_stage(&ClimatologyStage, &cube(false)).unwrap();
        assert_eq!(clim.deviation.n_time, 4);
        assert_eq!(clim.monthly.maps.len(), 12);
        // One sample per month: every deviation is zero.
        let ex = clim.extremes.unwrap();
        assert_eq!(ex.max.value, 0.0);
    }
}
