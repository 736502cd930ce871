// Copyright 2025 ChronoWave Labs
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

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Timestamp used across the metadata layer. Millisecond precision is the
/// convention of the front protocol; the metadata core only requires a total
/// order.
pub type Timestamp = i64;

/// Sentinel for an unbounded fragment end time.
pub const TIME_MAX: Timestamp = Timestamp::MAX;

/// A half-open interval `[start, end)` on the time axis. `end == TIME_MAX`
/// means the interval is open-ended ("latest").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeInterval {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Interval starting at `start` with no upper bound.
    pub fn open_ended(start: Timestamp) -> Self {
        Self {
            start,
            end: TIME_MAX,
        }
    }

    pub fn is_open_ended(&self) -> bool {
        self.end == TIME_MAX
    }

    pub fn span(&self) -> i64 {
        self.end - self.start
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersect(&self, other: &TimeInterval) -> Option<TimeInterval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(TimeInterval { start, end })
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open_ended() {
            write!(f, "[{}, +inf)", self.start)
        } else {
            write!(f, "[{}, {})", self.start, self.end)
        }
    }
}

/// A half-open interval `[start, end)` over time-series names, ordered
/// lexicographically. `None` on either side means the bound is open: a
/// `None` start sorts below every name, a `None` end above every name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSeriesInterval {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl TimeSeriesInterval {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }

    pub fn bounded(start: Option<String>, end: Option<String>) -> Self {
        Self { start, end }
    }

    /// The interval covering the whole series space.
    pub fn full() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    pub fn contains(&self, series: &str) -> bool {
        let after_start = match &self.start {
            Some(s) => s.as_str() <= series,
            None => true,
        };
        let before_end = match &self.end {
            Some(e) => series < e.as_str(),
            None => true,
        };
        after_start && before_end
    }

    pub fn overlaps(&self, other: &TimeSeriesInterval) -> bool {
        let left_ok = match (&self.start, &other.end) {
            (Some(s), Some(e)) => s < e,
            _ => true,
        };
        let right_ok = match (&other.start, &self.end) {
            (Some(s), Some(e)) => s < e,
            _ => true,
        };
        left_ok && right_ok
    }
}

impl Ord for TimeSeriesInterval {
    fn cmp(&self, other: &Self) -> Ordering {
        fn start_key(b: &Option<String>) -> (bool, &str) {
            // `false < true`: an open start sorts first.
            match b {
                None => (false, ""),
                Some(s) => (true, s.as_str()),
            }
        }
        fn end_key(b: &Option<String>) -> (bool, &str) {
            // An open end sorts last.
            match b {
                None => (true, ""),
                Some(s) => (false, s.as_str()),
            }
        }
        start_key(&self.start)
            .cmp(&start_key(&other.start))
            .then_with(|| end_key(&self.end).cmp(&end_key(&other.end)))
    }
}

impl PartialOrd for TimeSeriesInterval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TimeSeriesInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.as_deref().unwrap_or("-inf"),
            self.end.as_deref().unwrap_or("+inf"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_interval_overlap() {
        let a = TimeInterval::new(0, 100);
        assert!(a.overlaps(&TimeInterval::new(50, 150)));
        assert!(a.overlaps(&TimeInterval::new(99, 100)));
        assert!(!a.overlaps(&TimeInterval::new(100, 200)));
        assert!(!a.overlaps(&TimeInterval::new(-10, 0)));
        assert!(a.overlaps(&TimeInterval::open_ended(0)));
        assert_eq!(
            a.intersect(&TimeInterval::new(50, 150)),
            Some(TimeInterval::new(50, 100))
        );
        assert_eq!(a.intersect(&TimeInterval::new(100, 150)), None);
    }

    #[test]
    fn test_series_interval_contains() {
        let iv = TimeSeriesInterval::new("a.b", "a.f");
        assert!(iv.contains("a.b"));
        assert!(iv.contains("a.e.z"));
        assert!(!iv.contains("a.f"));
        assert!(!iv.contains("a.a"));

        let full = TimeSeriesInterval::full();
        assert!(full.contains(""));
        assert!(full.contains("zzz"));
    }

    #[test]
    fn test_series_interval_overlap() {
        let iv = TimeSeriesInterval::new("b", "d");
        assert!(iv.overlaps(&TimeSeriesInterval::new("c", "e")));
        assert!(iv.overlaps(&TimeSeriesInterval::full()));
        assert!(!iv.overlaps(&TimeSeriesInterval::new("d", "e")));
        assert!(iv.overlaps(&TimeSeriesInterval::bounded(None, Some("c".into()))));
        assert!(!iv.overlaps(&TimeSeriesInterval::bounded(Some("d".into()), None)));
    }

    #[test]
    fn test_series_interval_order() {
        let mut ivs = vec![
            TimeSeriesInterval::new("m", "z"),
            TimeSeriesInterval::full(),
            TimeSeriesInterval::new("a", "m"),
            TimeSeriesInterval::bounded(Some("a".into()), None),
        ];
        ivs.sort();
        assert_eq!(ivs[0], TimeSeriesInterval::full());
        assert_eq!(ivs[1], TimeSeriesInterval::new("a", "m"));
        assert_eq!(ivs[2], TimeSeriesInterval::bounded(Some("a".into()), None));
        assert_eq!(ivs[3], TimeSeriesInterval::new("m", "z"));
    }
}
