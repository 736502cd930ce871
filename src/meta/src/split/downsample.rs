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

use chronowave_common::types::{TimeInterval, Timestamp};

/// One time shard of a downsampled aggregate, tagged with the combine group
/// the execution layer uses to reunite partial aggregates across fragment
/// boundaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownsampleShard {
    pub interval: TimeInterval,
    pub combine_group: u64,
}

/// Split the sorted, non-overlapping fragment time intervals that cover a
/// downsample plan's `[begin, end)` range into shards aligned on the
/// precision grid anchored at `begin`.
///
/// Per interval, up to three shards come out:
/// - a prefix completing the precision window straddling the previous
///   interval boundary (never for the first interval, or when the interval
///   already starts on the grid),
/// - a whole-groups shard spanning every complete window inside,
/// - a suffix with the sub-precision remainder.
///
/// Whole windows each occupy their own combine group; a whole-groups shard
/// spanning n windows is labeled with the first one and advances the
/// counter by n. Sub-precision shards share a combine group until their
/// accumulated span reaches the precision, then the counter advances.
pub fn split_downsample_intervals(
    intervals: &[TimeInterval],
    begin: Timestamp,
    end: Timestamp,
    precision: i64,
) -> Vec<DownsampleShard> {
    split_downsample_intervals_from(intervals, begin, end, precision, 0).0
}

/// As [`split_downsample_intervals`], continuing the combine-group counter
/// from `first_group`. Returns the shards and the next unused group.
pub fn split_downsample_intervals_from(
    intervals: &[TimeInterval],
    begin: Timestamp,
    end: Timestamp,
    precision: i64,
    first_group: u64,
) -> (Vec<DownsampleShard>, u64) {
    if precision <= 0 {
        tracing::error!(precision, "downsample precision must be positive");
        return (Vec::new(), first_group);
    }

    let mut shards = Vec::new();
    let mut next_group = first_group;
    // The sub-precision group still accepting spans: (group, accumulated).
    let mut partial: Option<(u64, i64)> = None;

    for (i, interval) in intervals.iter().enumerate() {
        let mut b = interval.start.max(begin);
        let e = interval.end.min(end);
        if b >= e {
            continue;
        }

        let offset = (interval.start - begin).rem_euclid(precision);
        if i != 0 && offset != 0 {
            // Complete the window straddling the interval boundary.
            let prefix_end = (b + precision - offset).min(e);
            let span = prefix_end - b;
            let group = match partial.take() {
                Some((group, accumulated)) => {
                    if accumulated + span < precision {
                        partial = Some((group, accumulated + span));
                    }
                    group
                }
                None => {
                    let group = next_group;
                    next_group += 1;
                    partial = Some((group, span));
                    group
                }
            };
            shards.push(DownsampleShard {
                interval: TimeInterval::new(b, prefix_end),
                combine_group: group,
            });
            b = prefix_end;
        }

        if e - b >= precision {
            let windows = (e - b) / precision;
            let whole_end = b + windows * precision;
            shards.push(DownsampleShard {
                interval: TimeInterval::new(b, whole_end),
                combine_group: next_group,
            });
            next_group += windows as u64;
            // Time has moved past any window still waiting for spans.
            partial = None;
            b = whole_end;
        }

        if b < e {
            let group = next_group;
            next_group += 1;
            shards.push(DownsampleShard {
                interval: TimeInterval::new(b, e),
                combine_group: group,
            });
            partial = Some((group, e - b));
        }
    }
    (shards, next_group)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(start: i64, end: i64) -> TimeInterval {
        TimeInterval::new(start, end)
    }

    #[test]
    fn test_single_interval_unaligned_begin() {
        // First interval is exempt from the prefix rule even though
        // 10 mod 20 != 0.
        let shards = split_downsample_intervals(&[iv(0, 100)], 10, 95, 20);
        assert_eq!(
            shards,
            vec![
                DownsampleShard {
                    interval: iv(10, 90),
                    combine_group: 0,
                },
                DownsampleShard {
                    interval: iv(90, 95),
                    combine_group: 4,
                },
            ]
        );
    }

    #[test]
    fn test_boundary_straddling_group() {
        let shards = split_downsample_intervals(&[iv(0, 50), iv(50, 100)], 0, 100, 30);
        assert_eq!(
            shards,
            vec![
                DownsampleShard {
                    interval: iv(0, 30),
                    combine_group: 0,
                },
                // Suffix opens group 1 with span 20...
                DownsampleShard {
                    interval: iv(30, 50),
                    combine_group: 1,
                },
                // ...and the prefix of the next interval completes it.
                DownsampleShard {
                    interval: iv(50, 60),
                    combine_group: 1,
                },
                DownsampleShard {
                    interval: iv(60, 90),
                    combine_group: 2,
                },
                DownsampleShard {
                    interval: iv(90, 100),
                    combine_group: 3,
                },
            ]
        );
    }

    #[test]
    fn test_coverage_and_alignment() {
        let cases: &[(&[TimeInterval], i64, i64, i64)] = &[
            (&[iv(0, 100)], 10, 95, 20),
            (&[iv(0, 50), iv(50, 100)], 0, 100, 30),
            (&[iv(5, 23), iv(23, 57), iv(57, 200)], 7, 180, 13),
            (&[iv(0, 10)], 0, 100, 50),
            (&[iv(0, 40), iv(60, 100)], 5, 95, 25),
        ];
        for (intervals, begin, end, p) in cases {
            let shards = split_downsample_intervals(intervals, *begin, *end, *p);

            // Coverage: the union of shards equals the clipped input, with
            // no overlaps.
            let mut expected = Vec::new();
            for interval in *intervals {
                let b = interval.start.max(*begin);
                let e = interval.end.min(*end);
                if b < e {
                    expected.push((b, e));
                }
            }
            let mut covered: Vec<(i64, i64)> = shards
                .iter()
                .map(|s| (s.interval.start, s.interval.end))
                .collect();
            covered.sort_unstable();
            for pair in covered.windows(2) {
                assert!(pair[0].1 <= pair[1].0, "overlapping shards: {covered:?}");
            }
            // Merge adjacent shards and compare.
            let mut merged: Vec<(i64, i64)> = Vec::new();
            for (s, e) in covered {
                match merged.last_mut() {
                    Some(last) if last.1 == s => last.1 = e,
                    _ => merged.push((s, e)),
                }
            }
            assert_eq!(merged, expected, "coverage mismatch for p={p}");

            // Alignment: whole-groups shards span a positive multiple of p
            // starting on the grid anchored at begin.
            for shard in &shards {
                if shard.interval.span() >= *p {
                    assert_eq!(shard.interval.span() % p, 0);
                    assert_eq!((shard.interval.start - begin).rem_euclid(*p), 0);
                }
            }
        }
    }

    #[test]
    fn test_group_counter_monotone_and_distinct() {
        let shards =
            split_downsample_intervals(&[iv(5, 23), iv(23, 57), iv(57, 200)], 7, 180, 13);
        // Groups never decrease along the time axis.
        for pair in shards.windows(2) {
            assert!(pair[0].combine_group <= pair[1].combine_group);
        }
        // A sub-precision group accumulates at most one closure.
        for group in shards.iter().map(|s| s.combine_group) {
            let total: i64 = shards
                .iter()
                .filter(|s| s.combine_group == group && s.interval.span() < 13)
                .map(|s| s.interval.span())
                .sum();
            assert!(total <= 13);
        }
    }

    #[test]
    fn test_counter_continuation() {
        let (first, next) = split_downsample_intervals_from(&[iv(0, 60)], 0, 60, 30, 0);
        assert_eq!(first.len(), 1);
        assert_eq!(next, 2);
        let (second, next) = split_downsample_intervals_from(&[iv(0, 45)], 0, 45, 30, next);
        assert_eq!(second[0].combine_group, 2);
        assert_eq!(second[1].combine_group, 3);
        assert_eq!(next, 4);
    }

    #[test]
    fn test_invalid_precision() {
        assert!(split_downsample_intervals(&[iv(0, 10)], 0, 10, 0).is_empty());
    }
}
