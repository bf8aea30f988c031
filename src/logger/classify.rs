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

//! Intake classification: far-future detection, oversize vector/string
//! checks. Rate-limit admission is handled separately by
//! [`super::rate_limit::RateWindow`] since it needs mutable per-path state;
//! this module only covers the stateless per-event checks.

use crate::config::Config;
use crate::logger::bad_data::BadDataRecord;
use crate::timestamp::Timestamp;
use crate::value::Value;

/// Origin of an event's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Origin {
    UserAssigned,
    LoggerAssigned,
}

/// A property-update event as received from the messaging layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEvent {
    pub device_id: String,
    pub path: String,
    pub value: Value,
    pub stamp: Timestamp,
    pub origin: Origin,
}

/// Outcome of classifying one [`PropertyEvent`] against the size/time
/// checks. Rate-limiting is applied afterwards by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SizeTimeClassification {
    /// Passed every check unmodified.
    Good(PropertyEvent),
    /// Stamp was more than `far_future_tolerance` ahead of `now`; the event
    /// is still logged, but under a logger-assigned stamp, and a bad-data
    /// record accompanies it.
    RetimedGood { event: PropertyEvent, bad_data: BadDataRecord },
    /// Vector/string oversize: dropped entirely.
    Bad(BadDataRecord),
}

/// Classifies far-future skew and oversize vectors/strings for one event.
/// Rate-limiting is not applied here.
pub fn classify_size_and_time(
    config: &Config,
    now: Timestamp,
    mut event: PropertyEvent,
) -> SizeTimeClassification {
    if let Some(len) = event.value.vector_len() {
        if len > config.max_vector_size {
            return SizeTimeClassification::Bad(BadDataRecord::oversize_vector(
                event.device_id,
                now,
                len,
            ));
        }
    }

    if let Some(len) = event.value.string_len() {
        if len > config.max_value_string_size {
            return SizeTimeClassification::Bad(BadDataRecord::oversize_string(
                event.device_id,
                now,
                &event.path,
            ));
        }
    }

    let ahead = event.stamp.seconds_ahead_of(now);
    if ahead > config.far_future_tolerance.as_secs() as i64 {
        let orig_stamp = event.stamp;
        let bad_data = BadDataRecord::far_future(event.device_id.clone(), now, orig_stamp);
        event.stamp = now;
        event.origin = Origin::LoggerAssigned;
        return SizeTimeClassification::RetimedGood { event, bad_data };
    }

    SizeTimeClassification::Good(event)
}

/// Decides whether the logger's rate-accounting reference should switch from
/// event-time to wall-time.
///
/// Resolution (documented in `DESIGN.md`): the switch is a one-way,
/// per-logger-instance latch -- once skew exceeds
/// `far_future_wall_time_switch_threshold`, the logger keeps using
/// wall-time as its rate-accounting reference for the remainder of its
/// lifetime, even if subsequent events "catch up". Oscillating-clock
/// semantics are therefore deterministic by construction: the first
/// qualifying skew flips the latch exactly once.
pub fn should_switch_to_wall_time_reference(
    config: &Config,
    now: Timestamp,
    event_stamp: Timestamp,
) -> bool {
    let ahead = event_stamp.seconds_ahead_of(now);
    ahead > config.far_future_wall_time_switch_threshold.as_secs() as i64
}
