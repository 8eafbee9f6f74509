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

use chrono_tz::Tz;
use weir_common::time::{
    add_time, interval_step_seconds, start_of_interval, IntervalError, IntervalKind,
};

use crate::error::{StreamError, StreamResult};

/// The synthetic timestamp column added to `now()` proctime views during
/// ingest.
pub const PROCTIME_TIMESTAMP_COLUMN: &str = "____timestamp";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeWindowKind {
    Tumble,
    Hop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeMode {
    /// Window boundaries decided by the wall clock.
    Proctime,
    /// Window boundaries decided by row timestamps.
    EventTime,
}

/// How event time is assumed to progress, which decides when a window can
/// fire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatermarkPolicy {
    /// Timestamps never repeat or go back: a window fires as soon as a later
    /// window is seen.
    StrictlyAscending,
    /// Timestamps may repeat. Behaves as `Bounded` by one second.
    Ascending,
    /// Timestamps may be out of order by at most the given interval.
    Bounded { kind: IntervalKind, n: i64 },
}

impl WatermarkPolicy {
    /// The bias interval of the bounded advance loop, `None` for the strictly
    /// ascending policy.
    pub fn bias(&self) -> Option<(IntervalKind, i64)> {
        match self {
            Self::StrictlyAscending => None,
            Self::Ascending => Some((IntervalKind::Second, 1)),
            Self::Bounded { kind, n } => Some((*kind, *n)),
        }
    }

    /// Whether the policy tolerates out-of-order timestamps. Used by the
    /// ingest path to clamp the lateness bound.
    pub fn is_bounded(&self) -> bool {
        !matches!(self, Self::StrictlyAscending)
    }
}

/// Immutable description of a view's windowing behavior, built once at view
/// creation.
#[derive(Clone, Debug)]
pub struct WindowSpec {
    pub kind: TimeWindowKind,
    pub window_kind: IntervalKind,
    pub window_n: i64,
    /// For `Hop` the hop interval; equals the window for `Tumble`.
    pub hop_kind: IntervalKind,
    pub hop_n: i64,
    /// `gcd(hop_n, window_n)`: the length of the non-overlapping sub-window
    /// that partial aggregates are keyed by.
    pub slice_n: i64,
    /// The slide between consecutive windows: the window itself for `Tumble`,
    /// the hop for `Hop`.
    pub slide_kind: IntervalKind,
    pub slide_n: i64,
    pub time_mode: TimeMode,
    pub watermark: Option<WatermarkPolicy>,
    pub lateness: Option<(IntervalKind, i64)>,
    pub timezone: Tz,
    /// The event time column, or [`PROCTIME_TIMESTAMP_COLUMN`] for `now()`
    /// views.
    pub timestamp_column: String,
    /// Name of the window-id column in the inner table.
    pub window_id_column: String,
    /// Name of the materialized `(start, end)` window column in fired output.
    pub window_column: String,
    /// Whether the view's time column is `now()`; ingest then materializes
    /// [`PROCTIME_TIMESTAMP_COLUMN`] with the wall clock.
    pub is_time_column_now: bool,
}

impl WindowSpec {
    /// A tumbling window of `n * kind` over the given timestamp column.
    pub fn tumble(kind: IntervalKind, n: i64, timestamp_column: impl Into<String>) -> Builder {
        Builder {
            kind: TimeWindowKind::Tumble,
            window_kind: kind,
            window_n: n,
            hop_n: n,
            timestamp_column: timestamp_column.into(),
            window_id_column: "window_id".into(),
            window_column: "window".into(),
            watermark: None,
            lateness: None,
            timezone: chrono_tz::UTC,
            is_time_column_now: false,
        }
    }

    /// A hopping window of size `window_n * kind` advancing by `hop_n * kind`.
    pub fn hop(
        kind: IntervalKind,
        hop_n: i64,
        window_n: i64,
        timestamp_column: impl Into<String>,
    ) -> Builder {
        Builder {
            kind: TimeWindowKind::Hop,
            window_kind: kind,
            window_n,
            hop_n,
            timestamp_column: timestamp_column.into(),
            window_id_column: "window_id".into(),
            window_column: "window".into(),
            watermark: None,
            lateness: None,
            timezone: chrono_tz::UTC,
            is_time_column_now: false,
        }
    }

    /// Lower bound of the oldest window still containing `t`.
    pub fn window_lower_bound(&self, t: u32) -> Result<u32, IntervalError> {
        match self.kind {
            TimeWindowKind::Tumble => {
                start_of_interval(t, self.window_kind, self.window_n, self.timezone)
            }
            TimeWindowKind::Hop => {
                let start = start_of_interval(t, self.hop_kind, self.hop_n, self.timezone)?;
                let end = add_time(start, self.hop_kind, self.hop_n, self.timezone)?;
                add_time(end, self.hop_kind, -self.window_n, self.timezone)
            }
        }
    }

    /// Upper bound of the earliest window containing `t`, advancing on the
    /// slide grid.
    pub fn window_upper_bound(&self, t: u32) -> Result<u32, IntervalError> {
        let start = start_of_interval(t, self.slide_kind, self.slide_n, self.timezone)?;
        add_time(start, self.slide_kind, self.slide_n, self.timezone)
    }

    /// The window id a row with timestamp `t` is keyed by in the inner table:
    /// the window upper bound for tumbling views, the upper bound of the
    /// containing slice for hopping views.
    pub fn window_id_of(&self, t: u32) -> Result<u32, IntervalError> {
        match self.kind {
            TimeWindowKind::Tumble => self.window_upper_bound(t),
            TimeWindowKind::Hop => {
                let start = start_of_interval(t, self.window_kind, self.slice_n, self.timezone)?;
                add_time(start, self.window_kind, self.slice_n, self.timezone)
            }
        }
    }

    /// The window ids contributing to the window ending at `w`: just `w` for
    /// a tumbling view; for a hopping view every slice boundary in the open
    /// interval `(w - window, w]`, newest first.
    pub fn window_slices(&self, w: u32) -> Result<Vec<u32>, IntervalError> {
        match self.kind {
            TimeWindowKind::Tumble => Ok(vec![w]),
            TimeWindowKind::Hop => {
                let w_start = add_time(w, self.window_kind, -self.window_n, self.timezone)?;
                let mut bounds = Vec::new();
                let mut w_end = w;
                while w_start < w_end {
                    bounds.push(w_end);
                    w_end = add_time(w_end, self.window_kind, -self.slice_n, self.timezone)?;
                }
                Ok(bounds)
            }
        }
    }

    /// Seconds between consecutive proctime fires.
    pub fn slide_step_seconds(&self) -> Result<u64, IntervalError> {
        interval_step_seconds(self.slide_kind, self.slide_n, self.timezone)
    }
}

/// Builder validating a [`WindowSpec`]; errors mirror the checks done when a
/// view is created.
#[derive(Clone, Debug)]
pub struct Builder {
    kind: TimeWindowKind,
    window_kind: IntervalKind,
    window_n: i64,
    hop_n: i64,
    timestamp_column: String,
    window_id_column: String,
    window_column: String,
    watermark: Option<WatermarkPolicy>,
    lateness: Option<(IntervalKind, i64)>,
    timezone: Tz,
    is_time_column_now: bool,
}

impl Builder {
    /// Switch the view to event time with the given progress policy.
    pub fn with_watermark(mut self, policy: WatermarkPolicy) -> Self {
        self.watermark = Some(policy);
        self
    }

    pub fn with_lateness(mut self, kind: IntervalKind, n: i64) -> Self {
        self.lateness = Some((kind, n));
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_window_id_column(mut self, name: impl Into<String>) -> Self {
        self.window_id_column = name.into();
        self
    }

    pub fn with_window_column(mut self, name: impl Into<String>) -> Self {
        self.window_column = name.into();
        self
    }

    /// Mark the time column as `now()`. Ingest will materialize the wall
    /// clock into [`PROCTIME_TIMESTAMP_COLUMN`].
    pub fn with_time_column_now(mut self) -> Self {
        self.is_time_column_now = true;
        self.timestamp_column = PROCTIME_TIMESTAMP_COLUMN.into();
        self
    }

    pub fn build(self) -> StreamResult<WindowSpec> {
        check_interval("window", self.window_kind, self.window_n)?;
        if self.kind == TimeWindowKind::Hop {
            check_interval("hop", self.window_kind, self.hop_n)?;
        }
        if let Some(WatermarkPolicy::Bounded { kind, n }) = self.watermark {
            check_interval("watermark", kind, n)?;
        }
        if let Some((kind, n)) = self.lateness {
            check_interval("lateness", kind, n)?;
        }
        if self.is_time_column_now && self.watermark.is_some() {
            return Err(StreamError::incorrect_query(
                "now() is not supported for Event time processing",
            ));
        }

        let (slide_n, slice_n) = match self.kind {
            TimeWindowKind::Tumble => (self.window_n, self.window_n),
            TimeWindowKind::Hop => (self.hop_n, gcd(self.hop_n, self.window_n)),
        };

        Ok(WindowSpec {
            kind: self.kind,
            window_kind: self.window_kind,
            window_n: self.window_n,
            hop_kind: self.window_kind,
            hop_n: self.hop_n,
            slice_n,
            slide_kind: self.window_kind,
            slide_n,
            time_mode: if self.watermark.is_some() {
                TimeMode::EventTime
            } else {
                TimeMode::Proctime
            },
            watermark: self.watermark,
            lateness: self.lateness,
            timezone: self.timezone,
            timestamp_column: self.timestamp_column,
            window_id_column: self.window_id_column,
            window_column: self.window_column,
            is_time_column_now: self.is_time_column_now,
        })
    }
}

fn check_interval(name: &'static str, kind: IntervalKind, n: i64) -> StreamResult<()> {
    if kind.is_fractional() {
        return Err(IntervalError::FractionalUnsupported.into());
    }
    if n <= 0 {
        return Err(StreamError::InvalidParam {
            name,
            reason: "value for Interval argument must be positive".into(),
        });
    }
    Ok(())
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
