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

//! Event timestamps.
//!
//! Attosecond precision is kept in-memory; the backend store only resolves
//! microseconds, so every conversion down to it must *truncate*, never
//! round, or ordering/idempotence would not hold across a
//! write-then-read round trip.

use std::convert::TryFrom;
use time::OffsetDateTime;

/// One attosecond is 10^-18 seconds; one microsecond is 10^-6 seconds.
const ATTOS_PER_MICRO: u64 = 1_000_000_000_000;

/// A point in time as produced by a device, with attosecond resolution and an
/// optional train (acquisition-cycle) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub seconds: i64,
    pub atto_seconds: u64,
    pub train_id: Option<u64>,
}

impl Timestamp {
    pub const fn new(seconds: i64, atto_seconds: u64) -> Self {
        Self { seconds, atto_seconds, train_id: None }
    }

    pub const fn with_train_id(mut self, train_id: u64) -> Self {
        self.train_id = Some(train_id);
        self
    }

    /// Builds a `Timestamp` from the current wall-clock time.
    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();
        Self::from_offset_date_time(now)
    }

    pub fn from_offset_date_time(dt: OffsetDateTime) -> Self {
        let nanos = dt.unix_timestamp_nanos();
        let seconds = i64::try_from(nanos.div_euclid(1_000_000_000))
            .expect("unix timestamp seconds must fit in i64");
        let nanos_only = nanos.rem_euclid(1_000_000_000) as u64;
        Self { seconds, atto_seconds: nanos_only * 1_000_000_000, train_id: None }
    }

    /// Converts this timestamp to microseconds since the Unix epoch,
    /// *truncating* (never rounding) the sub-microsecond remainder.
    pub fn to_micros(self) -> i64 {
        let micros_in_second = (self.atto_seconds / ATTOS_PER_MICRO) as i64;
        self.seconds * 1_000_000 + micros_in_second
    }

    /// Builds a `Timestamp` back from a microsecond count, e.g. as read back
    /// from the backend store. The result always has `atto_seconds` that is
    /// an exact multiple of `ATTOS_PER_MICRO`, reflecting the store's
    /// resolution.
    pub fn from_micros(micros: i64) -> Self {
        let seconds = micros.div_euclid(1_000_000);
        let micros_only = micros.rem_euclid(1_000_000) as u64;
        Self { seconds, atto_seconds: micros_only * ATTOS_PER_MICRO, train_id: None }
    }

    /// Formats this timestamp as extended ISO-8601 with microsecond
    /// precision, as required for `configTimepoint`.
    pub fn to_iso8601_micros(self) -> String {
        let micros = self.to_micros();
        let dt = OffsetDateTime::from_unix_timestamp(micros.div_euclid(1_000_000))
            .expect("timestamp out of range")
            + time::Duration::microseconds(micros.rem_euclid(1_000_000));
        let format = time::format_description::well_known::Iso8601::DEFAULT;
        dt.format(&format).expect("ISO-8601 formatting cannot fail for a valid OffsetDateTime")
    }

    /// Returns how many whole seconds `self` lies ahead of `reference`.
    /// Negative if `self` is in the past relative to `reference`.
    pub fn seconds_ahead_of(self, reference: Timestamp) -> i64 {
        self.seconds - reference.seconds
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(dt: OffsetDateTime) -> Self {
        Timestamp::from_offset_date_time(dt)
    }
}
