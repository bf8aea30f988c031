// karabo-datalogger
// Copyright 2022 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Sliding-window rate accounting.
//!
//! One [`RateWindow`] per `(deviceId, propertyPath)` and one per
//! `(deviceId, "::schema")`. Owned exclusively by the logger's loop task
//! and accessed only from it, so no internal locking is needed.

use std::collections::VecDeque;
use std::time::Duration;

use crate::timestamp::Timestamp;

/// A ring of timestamped byte costs covering the trailing window `W`.
#[derive(Debug, Default)]
pub struct RateWindow {
    entries: VecDeque<(Timestamp, u64)>,
}

impl RateWindow {
    pub fn new() -> Self {
        Self { entries: VecDeque::new() }
    }

    fn evict_older_than(&mut self, now: Timestamp, period: Duration) {
        let cutoff = now.seconds - period.as_secs() as i64;
        while let Some((stamp, _)) = self.entries.front() {
            if stamp.seconds < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn sum(&self) -> u64 {
        self.entries.iter().map(|(_, cost)| cost).sum()
    }

    /// Admits `cost` at `now` if it fits the remaining budget within the
    /// trailing `period`, recording it if so.
    ///
    /// Returns `true` if admitted.
    pub fn try_admit(&mut self, now: Timestamp, period: Duration, budget_bytes: u64, cost: u64) -> bool {
        self.evict_older_than(now, period);
        if self.sum() + cost > budget_bytes {
            return false;
        }
        self.entries.push_back((now, cost));
        true
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_within_budget() {
        let mut w = RateWindow::new();
        let now = Timestamp::new(0, 0);
        assert!(w.try_admit(now, Duration::from_secs(2), 32_000, 16_000));
        assert!(w.try_admit(now, Duration::from_secs(2), 32_000, 16_000));
        assert!(!w.try_admit(now, Duration::from_secs(2), 32_000, 1));
    }

    #[test]
    fn test_evicts_entries_outside_window() {
        let mut w = RateWindow::new();
        assert!(w.try_admit(Timestamp::new(0, 0), Duration::from_secs(2), 10, 10));
        // Well past the 2s window: the old cost must be evicted, freeing
        // the budget back up.
        assert!(w.try_admit(Timestamp::new(10, 0), Duration::from_secs(2), 10, 10));
    }

    #[test]
    fn test_sequential_burst_admits_half_of_oversized_burst() {
        // maxPerDevicePropLogRate = 32kB/s over a 2s window gives an
        // effective window budget of 64kB (see RateLimit::window_budget_bytes);
        // 16 x 8kB updates arriving at the same instant, admitted one at a
        // time in arrival order (the same way the intake loop calls
        // `try_admit` once per incoming event), admits exactly 8 of 16.
        let mut w = RateWindow::new();
        let now = Timestamp::new(0, 0);
        let window_budget = 32_000u64 * 2;
        let mut admitted = 0;
        let mut decisions = Vec::with_capacity(16);
        for _ in 0..16 {
            let ok = w.try_admit(now, Duration::from_secs(2), window_budget, 8_000);
            decisions.push(ok);
            if ok {
                admitted += 1;
            }
        }
        assert_eq!(8, admitted);
        // And they must be the first 8 in arrival order (FIFO).
        assert!(decisions[..8].iter().all(|&b| b));
        assert!(decisions[8..].iter().all(|&b| !b));
    }
}
