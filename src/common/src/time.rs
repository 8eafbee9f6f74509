// Copyright 2026 Weir Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Calendar-aware interval arithmetic over second-resolution timestamps.
//!
//! Timestamps are `u32` seconds since the Unix epoch. Month, quarter and year
//! arithmetic respects the supplied timezone; finer units are fixed-width.
//! Week flooring anchors at 1970-01-05, the first Monday after the epoch.

use std::fmt;

use chrono::{Datelike, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use chrono_tz::Tz;
use thiserror::Error;

/// Units an interval literal can carry. The sub-second kinds exist only to be
/// rejected: time windows operate at second resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntervalKind {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl IntervalKind {
    pub fn is_fractional(self) -> bool {
        matches!(
            self,
            Self::Nanosecond | Self::Microsecond | Self::Millisecond
        )
    }
}

impl fmt::Display for IntervalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Nanosecond => "Nanosecond",
            Self::Microsecond => "Microsecond",
            Self::Millisecond => "Millisecond",
            Self::Second => "Second",
            Self::Minute => "Minute",
            Self::Hour => "Hour",
            Self::Day => "Day",
            Self::Week => "Week",
            Self::Month => "Month",
            Self::Quarter => "Quarter",
            Self::Year => "Year",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    #[error("fractional seconds are not supported by time windows")]
    FractionalUnsupported,
    #[error("timestamp out of range in interval arithmetic")]
    OutOfRange,
}

pub type Result<T> = std::result::Result<T, IntervalError>;

const SECONDS_PER_WEEK: i64 = 7 * 86400;
/// Day number of 1970-01-05, the anchor for week flooring.
const FIRST_MONDAY_DAY_NUM: i64 = 4;

fn clamp_ts(v: i64) -> u32 {
    v.clamp(0, u32::MAX as i64) as u32
}

fn local(t: u32, tz: Tz) -> chrono::DateTime<Tz> {
    // A UTC instant maps to exactly one local datetime.
    tz.timestamp_opt(t as i64, 0).unwrap()
}

fn from_local(naive: NaiveDateTime, tz: Tz) -> Result<u32> {
    let resolved = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        // Ambiguous local times (DST fold) resolve to the earlier instant.
        LocalResult::Ambiguous(earliest, _) => earliest,
        // Local times inside a DST gap shift forward by an hour.
        LocalResult::None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()
            .ok_or(IntervalError::OutOfRange)?,
    };
    Ok(clamp_ts(resolved.timestamp()))
}

fn days_since_epoch(date: NaiveDate) -> i64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    (date - epoch).num_days()
}

fn date_at_day_num(days: i64) -> Result<NaiveDate> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    epoch
        .checked_add_signed(chrono::Duration::days(days))
        .ok_or(IntervalError::OutOfRange)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next.and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn add_months(t: u32, months: i64, tz: Tz) -> Result<u32> {
    let lt = local(t, tz);
    let total = lt.year() as i64 * 12 + lt.month0() as i64 + months;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let year = i32::try_from(year).map_err(|_| IntervalError::OutOfRange)?;
    // Clamp the day of month, e.g. Jan 31 + 1 month = Feb 28.
    let day = lt.day().min(days_in_month(year, month));
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or(IntervalError::OutOfRange)?;
    let naive = date
        .and_hms_opt(lt.hour(), lt.minute(), lt.second())
        .ok_or(IntervalError::OutOfRange)?;
    from_local(naive, tz)
}

/// Calendar-aware addition: `t + n * kind`. Negative `n` subtracts. Results
/// below the epoch saturate to 0.
pub fn add_time(t: u32, kind: IntervalKind, n: i64, tz: Tz) -> Result<u32> {
    let t64 = t as i64;
    match kind {
        IntervalKind::Nanosecond | IntervalKind::Microsecond | IntervalKind::Millisecond => {
            Err(IntervalError::FractionalUnsupported)
        }
        IntervalKind::Second => Ok(clamp_ts(t64 + n)),
        IntervalKind::Minute => Ok(clamp_ts(t64 + n * 60)),
        IntervalKind::Hour => Ok(clamp_ts(t64 + n * 3600)),
        IntervalKind::Day => Ok(clamp_ts(t64 + n * 86400)),
        IntervalKind::Week => Ok(clamp_ts(t64 + n * SECONDS_PER_WEEK)),
        IntervalKind::Month => add_months(t, n, tz),
        IntervalKind::Quarter => add_months(t, n * 3, tz),
        IntervalKind::Year => add_months(t, n * 12, tz),
    }
}

/// Floor `t` to the nearest multiple-of-`n` boundary of `kind`.
///
/// Second, minute and hour boundaries are plain modular arithmetic on UTC
/// seconds. Day and coarser boundaries are computed on the civil calendar in
/// the view timezone.
pub fn start_of_interval(t: u32, kind: IntervalKind, n: i64, tz: Tz) -> Result<u32> {
    debug_assert!(n > 0);
    let t64 = t as i64;
    match kind {
        IntervalKind::Nanosecond | IntervalKind::Microsecond | IntervalKind::Millisecond => {
            Err(IntervalError::FractionalUnsupported)
        }
        IntervalKind::Second => Ok(clamp_ts(t64 - t64.rem_euclid(n))),
        IntervalKind::Minute => {
            let unit = n * 60;
            Ok(clamp_ts(t64 - t64.rem_euclid(unit)))
        }
        IntervalKind::Hour => {
            let unit = n * 3600;
            Ok(clamp_ts(t64 - t64.rem_euclid(unit)))
        }
        IntervalKind::Day => {
            let days = days_since_epoch(local(t, tz).date_naive());
            let floored = days - days.rem_euclid(n);
            start_of_day(date_at_day_num(floored)?, tz)
        }
        IntervalKind::Week => {
            let days = days_since_epoch(local(t, tz).date_naive());
            let unit = n * 7;
            let floored = (days - FIRST_MONDAY_DAY_NUM).div_euclid(unit) * unit
                + FIRST_MONDAY_DAY_NUM;
            start_of_day(date_at_day_num(floored)?, tz)
        }
        IntervalKind::Month => {
            let lt = local(t, tz);
            let months = (lt.year() as i64 - 1970) * 12 + lt.month0() as i64;
            start_of_month_num(months - months.rem_euclid(n), tz)
        }
        IntervalKind::Quarter => {
            let lt = local(t, tz);
            let quarters = (lt.year() as i64 - 1970) * 4 + (lt.month0() as i64 / 3);
            let floored = quarters - quarters.rem_euclid(n);
            start_of_month_num(floored * 3, tz)
        }
        IntervalKind::Year => {
            let years = local(t, tz).year() as i64 - 1970;
            let floored = years - years.rem_euclid(n);
            start_of_month_num(floored * 12, tz)
        }
    }
}

fn start_of_day(date: NaiveDate, tz: Tz) -> Result<u32> {
    from_local(
        date.and_hms_opt(0, 0, 0).ok_or(IntervalError::OutOfRange)?,
        tz,
    )
}

/// Midnight of the first day of the month `months` months after 1970-01.
fn start_of_month_num(months: i64, tz: Tz) -> Result<u32> {
    let year = i32::try_from(1970 + months.div_euclid(12)).map_err(|_| IntervalError::OutOfRange)?;
    let month = months.rem_euclid(12) as u32 + 1;
    let date = NaiveDate::from_ymd_opt(year, month, 1).ok_or(IntervalError::OutOfRange)?;
    start_of_day(date, tz)
}

/// Length of one `n * kind` slide in seconds, used for proctime fire
/// scheduling. Kinds coarser than a day are measured from the epoch on the
/// civil calendar and converted through whole days.
pub fn interval_step_seconds(kind: IntervalKind, n: i64, tz: Tz) -> Result<u64> {
    if kind > IntervalKind::Day {
        let end = add_time(0, kind, n, tz)?;
        let days = days_since_epoch(local(end, tz).date_naive());
        Ok(days.max(0) as u64 * 86400)
    } else {
        Ok(add_time(0, kind, n, tz)? as u64)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono_tz::UTC;

    use super::*;

    #[test]
    fn test_fractional_kinds_rejected() {
        for kind in [
            IntervalKind::Nanosecond,
            IntervalKind::Microsecond,
            IntervalKind::Millisecond,
        ] {
            assert_matches!(
                add_time(0, kind, 1, UTC),
                Err(IntervalError::FractionalUnsupported)
            );
            assert_matches!(
                start_of_interval(0, kind, 1, UTC),
                Err(IntervalError::FractionalUnsupported)
            );
        }
    }

    #[test]
    fn test_add_fixed_width() {
        assert_eq!(add_time(10, IntervalKind::Second, 5, UTC).unwrap(), 15);
        assert_eq!(add_time(10, IntervalKind::Minute, 2, UTC).unwrap(), 130);
        assert_eq!(add_time(0, IntervalKind::Hour, 1, UTC).unwrap(), 3600);
        assert_eq!(add_time(86400, IntervalKind::Day, -1, UTC).unwrap(), 0);
        // Saturates at the epoch instead of wrapping.
        assert_eq!(add_time(10, IntervalKind::Second, -20, UTC).unwrap(), 0);
    }

    #[test]
    fn test_add_months_respects_calendar() {
        // 1970-01-31 + 1 month clamps to 1970-02-28.
        let jan31 = 30 * 86400;
        let feb28 = add_time(jan31, IntervalKind::Month, 1, UTC).unwrap();
        let lt = UTC.timestamp_opt(feb28 as i64, 0).unwrap();
        assert_eq!((lt.month(), lt.day()), (2, 28));

        // One year is twelve months.
        assert_eq!(
            add_time(0, IntervalKind::Year, 1, UTC).unwrap(),
            add_time(0, IntervalKind::Month, 12, UTC).unwrap(),
        );
    }

    #[test]
    fn test_start_of_fixed_width() {
        assert_eq!(start_of_interval(7, IntervalKind::Second, 5, UTC).unwrap(), 5);
        assert_eq!(start_of_interval(5, IntervalKind::Second, 5, UTC).unwrap(), 5);
        assert_eq!(
            start_of_interval(3599, IntervalKind::Minute, 30, UTC).unwrap(),
            1800
        );
        assert_eq!(
            start_of_interval(7200 + 59, IntervalKind::Hour, 2, UTC).unwrap(),
            7200
        );
    }

    #[test]
    fn test_start_of_week_anchors_on_monday() {
        // 1970-01-01 was a Thursday; the week anchor is Monday 1970-01-05.
        let jan_07 = 6 * 86400; // Wednesday
        assert_eq!(
            start_of_interval(jan_07, IntervalKind::Week, 1, UTC).unwrap(),
            4 * 86400
        );
    }

    #[test]
    fn test_start_of_month_quarter_year() {
        // 1970-05-15 00:00:00 UTC.
        let t = UTC
            .with_ymd_and_hms(1970, 5, 15, 0, 0, 0)
            .unwrap()
            .timestamp() as u32;

        let may_1 = UTC.with_ymd_and_hms(1970, 5, 1, 0, 0, 0).unwrap().timestamp() as u32;
        assert_eq!(start_of_interval(t, IntervalKind::Month, 1, UTC).unwrap(), may_1);

        let apr_1 = UTC.with_ymd_and_hms(1970, 4, 1, 0, 0, 0).unwrap().timestamp() as u32;
        assert_eq!(
            start_of_interval(t, IntervalKind::Quarter, 1, UTC).unwrap(),
            apr_1
        );

        assert_eq!(start_of_interval(t, IntervalKind::Year, 1, UTC).unwrap(), 0);

        // Two-month boundaries count from 1970-01.
        let mar_1 = UTC.with_ymd_and_hms(1970, 3, 1, 0, 0, 0).unwrap().timestamp() as u32;
        assert_eq!(start_of_interval(t, IntervalKind::Month, 2, UTC).unwrap(), may_1);
        let apr_15 = UTC
            .with_ymd_and_hms(1970, 4, 15, 0, 0, 0)
            .unwrap()
            .timestamp() as u32;
        assert_eq!(
            start_of_interval(apr_15, IntervalKind::Month, 2, UTC).unwrap(),
            mar_1
        );
    }

    #[test]
    fn test_day_flooring_uses_timezone() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 1970-01-02 02:00:00 UTC is still 1970-01-01 in New York.
        let t = (86400 + 2 * 3600) as u32;
        let floored = start_of_interval(t, IntervalKind::Day, 1, tz).unwrap();
        let lt = tz.timestamp_opt(floored as i64, 0).unwrap();
        assert_eq!((lt.month(), lt.day(), lt.hour()), (1, 1, 0));
    }

    #[test]
    fn test_interval_step_seconds() {
        assert_eq!(
            interval_step_seconds(IntervalKind::Second, 30, UTC).unwrap(),
            30
        );
        assert_eq!(
            interval_step_seconds(IntervalKind::Day, 1, UTC).unwrap(),
            86400
        );
        assert_eq!(
            interval_step_seconds(IntervalKind::Week, 1, UTC).unwrap(),
            7 * 86400
        );
        assert_eq!(
            interval_step_seconds(IntervalKind::Month, 1, UTC).unwrap(),
            31 * 86400
        );
    }
}
