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

//! The watermark state machine deciding when windows complete.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use weir_common::time::add_time;

use crate::error::StreamResult;
use crate::window::{TimeMode, WatermarkPolicy, WindowSpec};

/// Mutable watermark state. All fields are guarded by the clock's internal
/// lock; no suspension point is ever reached while it is held.
#[derive(Debug, Default)]
struct WatermarkState {
    /// Largest timestamp ever ingested.
    max_timestamp: u32,
    /// Next window end that has not yet been fired. 0 = uninitialized.
    max_watermark: u32,
    /// Largest watermark for which a fire has been scheduled.
    max_fired_watermark: u32,
    /// Pending fire signals in arrival order.
    fire_queue: VecDeque<u32>,
    /// Proctime only: wall-clock second of the next fire.
    next_fire_signal: u32,
}

/// A read-only view of the watermark state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatermarkSnapshot {
    pub max_timestamp: u32,
    pub max_watermark: u32,
    pub max_fired_watermark: u32,
}

/// The watermark clock of one window view. Ingest advances it with observed
/// window ends; the event-time fire task drains the signals it emits.
pub struct WatermarkClock {
    spec: Arc<WindowSpec>,
    state: Mutex<WatermarkState>,
    signal: Notify,
}

impl WatermarkClock {
    pub fn new(spec: Arc<WindowSpec>) -> Self {
        Self {
            spec,
            state: Mutex::new(WatermarkState::default()),
            signal: Notify::new(),
        }
    }

    pub fn snapshot(&self) -> WatermarkSnapshot {
        let state = self.state.lock();
        WatermarkSnapshot {
            max_timestamp: state.max_timestamp,
            max_watermark: state.max_watermark,
            max_fired_watermark: state.max_fired_watermark,
        }
    }

    pub fn update_max_timestamp(&self, timestamp: u32) {
        let mut state = self.state.lock();
        if timestamp > state.max_timestamp {
            state.max_timestamp = timestamp;
        }
    }

    /// Advance the watermark with an observed window end `w`, enqueueing a
    /// fire signal for every window that became complete. Returns the
    /// enqueued watermarks.
    ///
    /// The first observation only initializes `max_watermark`; `w = 0` is
    /// ignored.
    pub fn update_max_watermark(&self, w: u32) -> StreamResult<Vec<u32>> {
        if w == 0 {
            return Ok(Vec::new());
        }
        let spec = &self.spec;
        let mut state = self.state.lock();
        if state.max_watermark == 0 {
            state.max_watermark = spec.window_upper_bound(w - 1)?;
            return Ok(Vec::new());
        }

        let mut fired = Vec::new();
        match spec.watermark.unwrap_or(WatermarkPolicy::StrictlyAscending).bias() {
            None => {
                while state.max_watermark < w {
                    let cur = state.max_watermark;
                    state.fire_queue.push_back(cur);
                    fired.push(cur);
                    state.max_fired_watermark = cur;
                    state.max_watermark =
                        add_time(cur, spec.slide_kind, spec.slide_n, spec.timezone)?;
                }
            }
            Some((bias_kind, bias_n)) => {
                let mut bias = add_time(state.max_watermark, bias_kind, bias_n, spec.timezone)?;
                while bias <= state.max_timestamp {
                    let cur = state.max_watermark;
                    state.fire_queue.push_back(cur);
                    fired.push(cur);
                    state.max_fired_watermark = cur;
                    state.max_watermark =
                        add_time(cur, spec.slide_kind, spec.slide_n, spec.timezone)?;
                    bias = add_time(bias, spec.slide_kind, spec.slide_n, spec.timezone)?;
                }
            }
        }
        drop(state);

        if !fired.is_empty() {
            self.signal.notify_one();
        }
        Ok(fired)
    }

    /// Append explicit fire signals, re-firing windows that were already
    /// fired. Used by the lateness path of event-time ingest.
    pub fn add_fire_signals(&self, signals: impl IntoIterator<Item = u32>) {
        let mut state = self.state.lock();
        let mut added = false;
        for signal in signals {
            state.fire_queue.push_back(signal);
            added = true;
        }
        drop(state);
        if added {
            self.signal.notify_one();
        }
    }

    pub fn pop_fire_signal(&self) -> Option<u32> {
        self.state.lock().fire_queue.pop_front()
    }

    pub fn fire_queue_snapshot(&self) -> Vec<u32> {
        self.state.lock().fire_queue.iter().copied().collect()
    }

    /// A watermark below which inner rows can no longer contribute to any
    /// future fire and may be deleted.
    pub fn cleanup_bound(&self) -> StreamResult<u32> {
        let spec = &self.spec;
        let state = self.state.lock();
        let w_bound = state.max_fired_watermark;
        if w_bound == 0 {
            return Ok(0);
        }
        if spec.time_mode == TimeMode::EventTime {
            if state.max_watermark == 0 {
                return Ok(0);
            }
            if let Some((lateness_kind, lateness_n)) = spec.lateness {
                let lateness_bound =
                    add_time(state.max_timestamp, lateness_kind, -lateness_n, spec.timezone)?;
                let lateness_bound = spec.window_lower_bound(lateness_bound)?;
                if lateness_bound < w_bound {
                    return Ok(lateness_bound);
                }
            }
        }
        Ok(w_bound)
    }

    /// Wake the fire task, e.g. on shutdown.
    pub fn notify(&self) {
        self.signal.notify_one();
    }

    /// Wait for a fire signal with a bounded timeout; returns whether a
    /// signal arrived.
    pub async fn wait_for_signal(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.signal.notified())
            .await
            .is_ok()
    }

    pub(crate) fn init_next_fire_signal(&self, w: u32) {
        self.state.lock().next_fire_signal = w;
    }

    pub(crate) fn next_fire_signal(&self) -> u32 {
        self.state.lock().next_fire_signal
    }

    /// Record a proctime fire and step the schedule forward.
    pub(crate) fn proc_advance(&self, fired: u32, step_seconds: u64) {
        let mut state = self.state.lock();
        state.max_fired_watermark = fired;
        state.next_fire_signal = fired.saturating_add(step_seconds.min(u32::MAX as u64) as u32);
    }
}

#[cfg(test)]
mod tests {
    use weir_common::time::IntervalKind;

    use super::*;
    use crate::window::WindowSpec;

    fn clock(policy: WatermarkPolicy) -> WatermarkClock {
        let spec = WindowSpec::tumble(IntervalKind::Second, 5, "ts")
            .with_watermark(policy)
            .build()
            .unwrap();
        WatermarkClock::new(Arc::new(spec))
    }

    #[test]
    fn test_bootstrap_and_strictly_ascending_advance() {
        let clock = clock(WatermarkPolicy::StrictlyAscending);

        // First observation initializes only.
        assert_eq!(clock.update_max_watermark(5).unwrap(), Vec::<u32>::new());
        assert_eq!(clock.snapshot().max_watermark, 5);

        // A window end equal to the current watermark does not fire.
        assert_eq!(clock.update_max_watermark(5).unwrap(), Vec::<u32>::new());

        // Advancing to 10 completes the window ending at 5.
        assert_eq!(clock.update_max_watermark(10).unwrap(), vec![5]);
        let snapshot = clock.snapshot();
        assert_eq!(snapshot.max_watermark, 10);
        assert_eq!(snapshot.max_fired_watermark, 5);
        assert_eq!(clock.fire_queue_snapshot(), vec![5]);
    }

    #[test]
    fn test_strictly_ascending_fires_every_skipped_window() {
        let clock = clock(WatermarkPolicy::StrictlyAscending);
        clock.update_max_watermark(5).unwrap();
        assert_eq!(clock.update_max_watermark(20).unwrap(), vec![5, 10, 15]);
        assert_eq!(clock.fire_queue_snapshot(), vec![5, 10, 15]);
    }

    #[test]
    fn test_zero_watermark_ignored() {
        let clock = clock(WatermarkPolicy::StrictlyAscending);
        assert!(clock.update_max_watermark(0).unwrap().is_empty());
        assert_eq!(clock.snapshot().max_watermark, 0);
    }

    #[test]
    fn test_bounded_advance_held_back_by_max_timestamp() {
        let clock = clock(WatermarkPolicy::Bounded {
            kind: IntervalKind::Second,
            n: 2,
        });
        // Bootstrap from an early row.
        clock.update_max_timestamp(1);
        clock.update_max_watermark(5).unwrap();
        assert_eq!(clock.snapshot().max_watermark, 5);

        // Rows at t = 10, 11, 12 raise max_timestamp to 12; watermarks 5 and
        // 10 both drain because max_watermark + 2 <= 12 holds for each.
        clock.update_max_timestamp(12);
        assert_eq!(clock.update_max_watermark(15).unwrap(), vec![5, 10]);
        let snapshot = clock.snapshot();
        assert_eq!(snapshot.max_watermark, 15);
        assert_eq!(snapshot.max_fired_watermark, 10);
    }

    #[test]
    fn test_invariants_hold_while_advancing() {
        let clock = clock(WatermarkPolicy::StrictlyAscending);
        clock.update_max_watermark(5).unwrap();
        let mut last_fired = 0;
        for w in [10, 10, 25, 30] {
            clock.update_max_watermark(w).unwrap();
            let snapshot = clock.snapshot();
            let queue = clock.fire_queue_snapshot();
            // Every queued signal is at most max_watermark.
            assert!(queue.iter().all(|w| *w <= snapshot.max_watermark));
            // The queue is strictly ascending.
            assert!(queue.windows(2).all(|pair| pair[0] < pair[1]));
            // max_fired_watermark never decreases.
            assert!(snapshot.max_fired_watermark >= last_fired);
            last_fired = snapshot.max_fired_watermark;
        }
    }

    #[test]
    fn test_lateness_signals_are_appended_verbatim() {
        let clock = clock(WatermarkPolicy::StrictlyAscending);
        clock.update_max_watermark(5).unwrap();
        clock.update_max_watermark(15).unwrap();
        assert_eq!(clock.fire_queue_snapshot(), vec![5, 10]);

        // A late row re-fires an already-fired window.
        clock.add_fire_signals([5]);
        assert_eq!(clock.fire_queue_snapshot(), vec![5, 10, 5]);
    }

    #[test]
    fn test_cleanup_bound() {
        let spec = WindowSpec::tumble(IntervalKind::Second, 5, "ts")
            .with_watermark(WatermarkPolicy::StrictlyAscending)
            .with_lateness(IntervalKind::Second, 3)
            .build()
            .unwrap();
        let clock = WatermarkClock::new(Arc::new(spec));

        // Nothing fired yet.
        assert_eq!(clock.cleanup_bound().unwrap(), 0);

        clock.update_max_watermark(5).unwrap();
        clock.update_max_watermark(20).unwrap();
        clock.update_max_timestamp(20);
        // max_fired = 15; lateness bound = window_lower_bound(20 - 3) = 15.
        assert_eq!(clock.cleanup_bound().unwrap(), 15);

        // A smaller max_timestamp pulls the bound below max_fired: rows
        // within the lateness horizon of window 10 must survive cleanup.
        let clock = WatermarkClock::new(clock.spec.clone());
        clock.update_max_watermark(5).unwrap();
        clock.update_max_watermark(20).unwrap();
        clock.update_max_timestamp(14);
        // window_lower_bound(14 - 3) = 10 < max_fired = 15.
        assert_eq!(clock.cleanup_bound().unwrap(), 10);
    }

    #[tokio::test]
    async fn test_signal_notification() {
        let clock = Arc::new(clock(WatermarkPolicy::StrictlyAscending));
        clock.update_max_watermark(5).unwrap();
        clock.update_max_watermark(10).unwrap();
        // The enqueued signal left a stored permit.
        assert!(clock.wait_for_signal(Duration::from_millis(10)).await);
        // No further signal: the wait times out.
        assert!(!clock.wait_for_signal(Duration::from_millis(10)).await);
    }
}
