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

//! Schema de-duplication cache.
//!
//! Per-logger, never shared. Ref-counted by digest for the lifetime of a
//! device connection, modeled here as a plain reference count incremented
//! on each observed schema revision sharing a digest and decremented when a
//! device connection ends.

use std::collections::HashMap;
use std::time::Duration;

use crate::timestamp::Timestamp;

#[derive(Debug, Clone)]
struct CacheEntry {
    last_written_at: Timestamp,
    refcount: u32,
}

/// Tracks, per device, the most recent write time of each schema digest
/// observed.
#[derive(Debug, Default)]
pub struct SchemaDigestCache {
    entries: HashMap<(String, String), CacheEntry>,
}

impl SchemaDigestCache {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Decides whether a schema revision with `digest` for `device_id` needs
    /// to be written at `now`, given `retention`.
    ///
    /// A digest may be re-written for the same device only if the most
    /// recent record for that digest is older than `retention`; otherwise
    /// it is skipped.
    pub fn should_write(
        &mut self,
        device_id: &str,
        digest: &str,
        now: Timestamp,
        retention: Duration,
    ) -> bool {
        let key = (device_id.to_owned(), digest.to_owned());
        match self.entries.get(&key) {
            Some(entry) => {
                let age = now.seconds - entry.last_written_at.seconds;
                age >= retention.as_secs() as i64
            }
            None => true,
        }
    }

    /// Records that `digest` was just written for `device_id` at `now`, and
    /// bumps its reference count (the schema is now in use by the current
    /// device connection).
    pub fn record_write(&mut self, device_id: &str, digest: &str, now: Timestamp) {
        let key = (device_id.to_owned(), digest.to_owned());
        let entry = self
            .entries
            .entry(key)
            .or_insert(CacheEntry { last_written_at: now, refcount: 0 });
        entry.last_written_at = now;
        entry.refcount += 1;
    }

    pub fn refcount(&self, device_id: &str, digest: &str) -> u32 {
        let key = (device_id.to_owned(), digest.to_owned());
        self.entries.get(&key).map(|e| e.refcount).unwrap_or(0)
    }

    /// Releases every digest currently held by `device_id`, e.g. when its
    /// connection ends. Entries are kept (at refcount zero) rather than
    /// removed, since `should_write`'s retention check still needs their
    /// last-written timestamp if the device reconnects with the same schema.
    pub fn release_device(&mut self, device_id: &str) {
        for ((entry_device, _), entry) in self.entries.iter_mut() {
            if entry_device == device_id {
                entry.refcount = entry.refcount.saturating_sub(1);
            }
        }
    }
}
