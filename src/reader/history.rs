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

//! Down-sampling for `slotGetPropertyHistory`: uniform-time bucket
//! averaging, NaN-aware, deterministic.

use crate::timestamp::Timestamp;

/// Buckets `points` (already sorted by time) into exactly `buckets` uniform
/// time intervals spanning `[from, to]`, averaging the numeric value of
/// each bucket. NaN values are ignored when averaging; a bucket made up
/// entirely of NaNs yields NaN. A bucket with no points at all is dropped
/// entirely rather than synthesized: exactly `maxNumData` buckets are
/// produced only when there is at least one sample to place in each -- in
/// practice, `buckets <= points.len()` is guaranteed by the caller whenever
/// averaging triggers at all.
pub fn bucket_average(
    points: &[(Timestamp, f64)],
    from: Timestamp,
    to: Timestamp,
    buckets: usize,
) -> Vec<(Timestamp, f64)> {
    if buckets == 0 || points.is_empty() {
        return Vec::new();
    }

    let span_micros = (to.to_micros() - from.to_micros()).max(1);
    let bucket_width = span_micros as f64 / buckets as f64;

    let mut sums = vec![0.0f64; buckets];
    let mut counts = vec![0usize; buckets];
    let mut nan_counts = vec![0usize; buckets];
    let mut last_stamp_in_bucket: Vec<Option<Timestamp>> = vec![None; buckets];

    for &(stamp, value) in points {
        let offset = (stamp.to_micros() - from.to_micros()) as f64;
        let mut idx = (offset / bucket_width) as usize;
        if idx >= buckets {
            idx = buckets - 1;
        }
        last_stamp_in_bucket[idx] = Some(stamp);
        if value.is_nan() {
            nan_counts[idx] += 1;
        } else {
            sums[idx] += value;
            counts[idx] += 1;
        }
    }

    let mut out = Vec::with_capacity(buckets);
    for idx in 0..buckets {
        let Some(stamp) = last_stamp_in_bucket[idx] else { continue };
        let avg = if counts[idx] > 0 {
            sums[idx] / counts[idx] as f64
        } else {
            f64::NAN
        };
        out.push((stamp, avg));
    }
    out
}

/// Deterministically selects exactly `count` evenly-spaced points out of
/// `points` (already sorted by time), used for non-numeric histories (e.g.
/// strings, vectors, tables) where averaging does not apply.
pub fn uniform_select<T: Clone>(points: &[T], count: usize) -> Vec<T> {
    if count == 0 || points.is_empty() {
        return Vec::new();
    }
    if count >= points.len() {
        return points.to_vec();
    }
    let step = points.len() as f64 / count as f64;
    (0..count)
        .map(|i| {
            let idx = ((i as f64) * step) as usize;
            points[idx.min(points.len() - 1)].clone()
        })
        .collect()
}
