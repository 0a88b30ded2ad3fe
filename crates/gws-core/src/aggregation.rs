//! Monthly climatology, deviation cube, water-year means and extremes.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calendar::{group_by_month, group_by_water_year};
use crate::error::{GwsError, GwsResult};
use crate::masked::{MaskedField3D, MaskedMap};

fn check_dates(field: &MaskedField3D, dates: &[NaiveDate]) -> GwsResult<()> {
    if dates.len() != field.n_time {
        return Err(GwsError::invalid(format!(
            "{} dates for a field with {} time steps",
            dates.len(),
            field.n_time
        )));
    }
    Ok(())
}

// ── Climatology ──────────────────────────────────────────────────────────────

/// One masked-mean map per calendar month, January first.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyClimatology {
    pub maps: Vec<MaskedMap>,
}

impl MonthlyClimatology {
    /// Map for `month` in 1..=12.
    pub fn month(&self, month: u32) -> Option<&MaskedMap> {
        month.checked_sub(1).and_then(|m| self.maps.get(m as usize))
    }
}

pub fn monthly_climatology(cube: &MaskedField3D, dates: &[NaiveDate]) -> GwsResult<MonthlyClimatology> {
    check_dates(cube, dates)?;
    let groups = group_by_month(dates);
    let maps = groups
        .iter()
        .map(|(month, idx)| {
            if idx.is_empty() {
                debug!(month, "no samples for month");
            }
            cube.temporal_mean_over(idx)
        })
        .collect();
    Ok(MonthlyClimatology { maps })
}

/// Each time step minus its calendar month's climatology.
pub fn deviation_cube(
    cube: &MaskedField3D,
    dates: &[NaiveDate],
    climatology: &MonthlyClimatology,
) -> GwsResult<MaskedField3D> {
    check_dates(cube, dates)?;
    let mut dev = cube.clone();
    for (t, d) in dates.iter().enumerate() {
        let map = climatology
            .month(d.month())
            .ok_or_else(|| GwsError::invalid("climatology must hold 12 monthly maps"))?;
        dev.subtract_map_at(t, map)?;
    }
    Ok(dev)
}

/// Masked mean of the deviation cube per candidate water year, in candidate
/// order. Years without samples come back fully invalid.
pub fn annual_means(
    deviation: &MaskedField3D,
    dates: &[NaiveDate],
    candidate_years: &[i32],
) -> GwsResult<Vec<(i32, MaskedMap)>> {
    check_dates(deviation, dates)?;
    let groups = group_by_water_year(dates, candidate_years);
    Ok(groups
        .iter()
        .map(|(year, idx)| {
            let map = deviation.temporal_mean_over(idx);
            if idx.is_empty() {
                warn!(year, "water year has no samples");
            } else {
                debug!(year, epochs = idx.len(), cells = map.valid_count(), "water-year mean");
            }
            (year, map)
        })
        .collect())
}

// ── Extremes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extreme {
    pub value: f64,
    pub time_index: usize,
    pub lat_index: usize,
    pub lon_index: usize,
    pub date: NaiveDate,
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extremes {
    pub max: Extreme,
    pub min: Extreme,
}

/// Largest and smallest valid deviation; ties resolve to the lowest time
/// index. `None` when no value is valid.
pub fn extremes(deviation: &MaskedField3D, dates: &[NaiveDate]) -> GwsResult<Option<Extremes>> {
    check_dates(deviation, dates)?;
    let describe = |(value, k): (f64, usize)| {
        let (t, i, j) = deviation.unravel(k);
        let date = dates[t];
        Extreme {
            value,
            time_index: t,
            lat_index: i,
            lon_index: j,
            date,
            month: date.month(),
            year: date.year(),
        }
    };
    Ok(deviation
        .valid_extremes()
        .map(|(max, min)| Extremes { max: describe(max), min: describe(min) }))
}

// ── Combined ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Climatology {
    pub monthly: MonthlyClimatology,
    pub deviation: MaskedField3D,
    pub extremes: Option<Extremes>,
}

pub fn climatology(cube: &MaskedField3D, dates: &[NaiveDate]) -> GwsResult<Climatology> {
    let monthly = monthly_climatology(cube, dates)?;
    let deviation = deviation_cube(cube, dates, &monthly)?;
    let extremes = extremes(&deviation, dates)?;
    Ok(Climatology { monthly, deviation, extremes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn monthly_dates(start_year: i32, start_month: u32, n: usize) -> Vec<NaiveDate> {
        (0..n)
            .map(|i| {
                let m0 = start_month - 1 + i as u32;
                NaiveDate::from_ymd_opt(start_year + (m0 / 12) as i32, m0 % 12 + 1, 15).unwrap()
            })
            .collect()
    }

    #[test]
    fn date_count_must_match() {
        let f = MaskedField3D::masked_all(3, 1, 1);
        assert!(monthly_climatology(&f, &monthly_dates(2002, 1, 2)).is_err());
    }

    #[test]
    fn climatology_and_deviation() {
        // 24 monthly steps on one cell: value = month + 10·year_index.
        let dates = monthly_dates(2002, 1, 24);
        let data: Vec<f64> = dates.iter().enumerate().map(|(i, d)| d.month() as f64 + 10.0 * (i / 12) as f64).collect();
        let f = MaskedField3D::new(data, vec![false; 24], 24, 1, 1).unwrap();

        let clim = monthly_climatology(&f, &dates).unwrap();
        assert_eq!(clim.maps.len(), 12);
        assert_abs_diff_eq!(clim.month(3).unwrap().get(0, 0).unwrap(), 8.0, epsilon = 1e-12);

        let dev = deviation_cube(&f, &dates, &clim).unwrap();
        assert_eq!(dev.n_time, 24);
        assert_abs_diff_eq!(dev.get(0, 0, 0).unwrap(), -5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dev.get(12, 0, 0).unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn months_without_samples_are_fully_masked() {
        let dates = monthly_dates(2002, 1, 3);
        let f = MaskedField3D::new(vec![1.0, 2.0, 3.0], vec![false; 3], 3, 1, 1).unwrap();
        let clim = monthly_climatology(&f, &dates).unwrap();
        assert!(clim.month(4).unwrap().all_masked());
        assert!(clim.month(13).is_none());
    }

    #[test]
    fn annual_means_follow_july_to_june_years() {
        // Jan 2003 .. Dec 2003: Jan–Jun → water year 2003, Jul–Dec → 2004.
        let dates = monthly_dates(2003, 1, 12);
        let data: Vec<f64> = (0..12).map(|i| if i < 6 { 1.0 } else { 3.0 }).collect();
        let f = MaskedField3D::new(data, vec![false; 12], 12, 1, 1).unwrap();
        let years = annual_means(&f, &dates, &[2002, 2003, 2004]).unwrap();
        assert_eq!(years.iter().map(|(y, _)| *y).collect::<Vec<_>>(), vec![2002, 2003, 2004]);
        assert!(years[0].1.all_masked());
        assert_eq!(years[1].1.get(0, 0), Some(1.0));
        assert_eq!(years[2].1.get(0, 0), Some(3.0));
    }

    #[test]
    fn extremes_report_first_occurrence() {
        let dates = monthly_dates(2002, 4, 4);
        // 4 steps on a 1×2 plane; the max 7.0 appears at t=1 and t=3.
        let f = MaskedField3D::new(
            vec![0.0, 1.0, 7.0, 2.0, -4.0, 9.0, 3.0, 7.0],
            vec![false, false, false, false, false, true, false, false],
            4,
            1,
            2,
        )
        .unwrap();
        let ex = extremes(&f, &dates).unwrap().unwrap();
        assert_eq!(ex.max.value, 7.0);
        assert_eq!((ex.max.time_index, ex.max.lat_index, ex.max.lon_index), (1, 0, 0));
        assert_eq!((ex.max.month, ex.max.year), (5, 2002));
        assert_eq!(ex.min.value, -4.0);
        assert_eq!((ex.min.month, ex.min.year), (6, 2002));

        let none = MaskedField3D::masked_all(4, 1, 1);
        assert!(extremes(&none, &dates).unwrap().is_none());
    }
}
