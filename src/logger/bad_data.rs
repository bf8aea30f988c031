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

//! Bad-data subcomponent: an in-memory ring per logger, write-through into
//! the `<deviceId>__BAD_DATA` measurement. Entries are immutable after
//! creation; read-time grouping by `deviceId` lives in [`crate::reader`],
//! not here.

use std::collections::VecDeque;

use crate::timestamp::Timestamp;

/// Why an event was classified as bad data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReasonCode {
    FarFuture,
    OversizeVector,
    OversizeString,
    RateLimited,
    SchemaRateLimited,
}

/// One immutable bad-data record.
#[derive(Debug, Clone, PartialEq)]
pub struct BadDataRecord {
    pub device_id: String,
    pub time: Timestamp,
    pub info: String,
    pub reason_code: ReasonCode,
}

impl BadDataRecord {
    pub fn far_future(device_id: impl Into<String>, time: Timestamp, orig_stamp: Timestamp) -> Self {
        Self {
            device_id: device_id.into(),
            time,
            info: format!("from far future {}", orig_stamp.to_iso8601_micros()),
            reason_code: ReasonCode::FarFuture,
        }
    }

    pub fn oversize_vector(device_id: impl Into<String>, time: Timestamp, size: usize) -> Self {
        Self {
            device_id: device_id.into(),
            time,
            info: format!("vector of size {size}"),
            reason_code: ReasonCode::OversizeVector,
        }
    }

    pub fn oversize_string(device_id: impl Into<String>, time: Timestamp, path: &str) -> Self {
        Self {
            device_id: device_id.into(),
            time,
            info: format!(">> [1] '{path}'"),
            reason_code: ReasonCode::OversizeString,
        }
    }

    pub fn rate_limited(device_id: impl Into<String>, time: Timestamp, path: &str) -> Self {
        let device_id = device_id.into();
        Self {
            info: format!("{device_id}::{path} rate limit exceeded"),
            device_id,
            time,
            reason_code: ReasonCode::RateLimited,
        }
    }

    pub fn schema_rate_limited(device_id: impl Into<String>, time: Timestamp) -> Self {
        let device_id = device_id.into();
        Self {
            info: format!("{device_id}::schema rate limit exceeded"),
            device_id,
            time,
            reason_code: ReasonCode::SchemaRateLimited,
        }
    }
}

/// A bounded, FIFO ring of [`BadDataRecord`]s owned by one logger instance.
#[derive(Debug, Default)]
pub struct BadDataRing {
    capacity: usize,
    entries: VecDeque<BadDataRecord>,
}

impl BadDataRing {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: VecDeque::new() }
    }

    pub fn push(&mut self, record: BadDataRecord) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &BadDataRecord> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
