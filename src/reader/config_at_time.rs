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

//! Pure helpers for `slotGetConfigurationFromPast`. Kept free of I/O so the
//! flag/timepoint rules can be unit tested without a backend.

use crate::timestamp::Timestamp;

/// `configTimepoint`: the maximum among all per-property stamps embedded in
/// the returned configuration.
pub fn config_timepoint(per_property_stamps: &[Timestamp]) -> Option<Timestamp> {
    per_property_stamps.iter().copied().max()
}

/// `configAtTimeFlag`: true iff no device-gone marker falls strictly
/// between `last_value_stamp` (the latest observed property value's stamp)
/// and `at_time` inclusive.
pub fn config_at_time_flag(
    device_gone_stamps: &[Timestamp],
    last_value_stamp: Timestamp,
    at_time: Timestamp,
) -> bool {
    !device_gone_stamps
        .iter()
        .any(|&gone| gone > last_value_stamp && gone <= at_time)
}
