//! Calendar utilities: day offsets → dates, and month / water-year grouping.
//!
//! Both products store time as a (possibly fractional) number of days since a
//! product-specific epoch. Conversion truncates toward negative infinity, the
//! same whole-day behaviour as adding a day delta to a calendar date.

use chrono::{Datelike, Months, NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GwsError, GwsResult};

/// Months added to a date before reading its year for water-year grouping.
/// A shift of 6 makes each group run July → June.
pub const WATER_YEAR_SHIFT_MONTHS: u32 = 6;

// ── Sources ──────────────────────────────────────────────────────────────────

/// Which product a time axis belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    /// Satellite gravimetry, days since 2002-01-01.
    Grace,
    /// Land-surface model, days since 2001-03-01.
    Gldas,
}

impl Source {
    pub fn epoch(self) -> NaiveDate {
        match self {
            // Both literals are valid calendar dates.
            Source::Grace => NaiveDate::from_ymd_opt(2002, 1, 1).unwrap_or_default(),
            Source::Gldas => NaiveDate::from_ymd_opt(2001, 3, 1).unwrap_or_default(),
        }
    }
}

// ── Conversion ───────────────────────────────────────────────────────────────

/// Convert day offsets into calendar dates: `epoch + floor(offset)` days.
pub fn days_to_dates(offsets: &[f64], epoch: NaiveDate) -> GwsResult<Vec<NaiveDate>> {
    if offsets.is_empty() {
        return Err(GwsError::invalid("time axis is empty"));
    }
    offsets
        .iter()
        .enumerate()
        .map(|(i, &off)| {
            if !off.is_finite() {
                return Err(GwsError::invalid(format!("time offset #{i} is not finite ({off})")));
            }
            let days = off.floor() as i64;
            TimeDelta::try_days(days)
                .and_then(|d| epoch.checked_add_signed(d))
                .ok_or_else(|| {
                    GwsError::invalid(format!("time offset #{i} ({off} days) overflows the calendar"))
                })
        })
        .collect()
}

/// Whole days from `epoch` to `date`.
pub fn day_offset(date: NaiveDate, epoch: NaiveDate) -> i64 {
    (date - epoch).num_days()
}

/// Day count with 0001-01-01 as day 1.
pub fn ordinal_day(date: NaiveDate) -> i64 {
    date.num_days_from_ce() as i64
}

// ── Grouping ─────────────────────────────────────────────────────────────────

/// Group key → time indices, in key order. Indices keep their time order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupIndex {
    groups: Vec<(i32, Vec<usize>)>,
}

impl GroupIndex {
    /// Indices for `key`; empty if the key is unknown or has no members.
    pub fn indices(&self, key: i32) -> &[usize] {
        self.groups
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &[usize])> {
        self.groups.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Group time indices by calendar month, keys 1..=12 (all present).
pub fn group_by_month(dates: &[NaiveDate]) -> GroupIndex {
    let mut groups: Vec<(i32, Vec<usize>)> = (1..=12).map(|m| (m, Vec::new())).collect();
    for (i, d) in dates.iter().enumerate() {
        groups[d.month0() as usize].1.push(i);
    }
    GroupIndex { groups }
}

/// The water year of a date: the year of `date + 6 months`.
pub fn water_year(date: NaiveDate) -> i32 {
    date.checked_add_months(Months::new(WATER_YEAR_SHIFT_MONTHS))
        .map(|d| d.year())
        .unwrap_or_else(|| date.year() + 1)
}

/// Group time indices by water year. Every candidate year gets a group (possibly
/// empty); dates whose water year is not a candidate are dropped.
pub fn group_by_water_year(dates: &[NaiveDate], candidate_years: &[i32]) -> GroupIndex {
    let mut groups: Vec<(i32, Vec<usize>)> =
        candidate_years.iter().map(|&y| (y, Vec::new())).collect();
    let mut dropped = 0usize;
    for (i, &d) in dates.iter().enumerate() {
        let wy = water_year(d);
        match groups.iter_mut().find(|(y, _)| *y == wy) {
            Some((_, idx)) => idx.push(i),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!(dropped, "dates outside the candidate water years were excluded");
    }
    GroupIndex { groups }
}
