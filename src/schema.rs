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

//! Device schema model: the per-property metadata an external schema
//! library would normally own. This crate consumes a flattened,
//! already-resolved view of it: one [`PropertySchema`] per dotted path, plus
//! a canonical serialization used to compute the content digest that drives
//! schema de-duplication.

use std::collections::BTreeMap;

use crate::value::ReferenceType;

/// Access mode of a property, as declared by the device schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AccessMode {
    ReadOnly,
    ReconfigurableReadWrite,
    InitOnly,
}

/// Whether a property is archived into the time-series store at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ArchivePolicy {
    Archive,
    NoArchive,
}

/// Metadata for a single property of a device schema.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PropertySchema {
    pub path: String,
    pub reference_type: ReferenceType,
    pub access_mode: AccessMode,
    pub archive_policy: ArchivePolicy,
    pub default: Option<String>,
    pub tags: Vec<String>,
    /// Free-form range/options metadata, kept as an opaque string because
    /// this crate never interprets it -- only persists and later reports it
    /// back verbatim.
    pub options: Option<String>,
}

impl PropertySchema {
    pub fn is_archived(&self) -> bool {
        matches!(self.archive_policy, ArchivePolicy::Archive)
    }
}

/// A device's full schema: an ordered map of dotted path to
/// [`PropertySchema`]. Order matters for the canonical serialization that
/// feeds the digest, so this is a `Vec` of pairs rather than a `BTreeMap`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeviceSchema {
    pub device_id: String,
    pub properties: Vec<PropertySchema>,
}

impl DeviceSchema {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self { device_id: device_id.into(), properties: Vec::new() }
    }

    pub fn property(&self, path: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.path == path)
    }

    /// Canonical serialization used both as the backend blob and as the
    /// digest input. Deliberately simple and stable: property order is
    /// preserved as declared, fields are joined with fixed separators.
    pub fn canonical_blob(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.device_id);
        out.push('\n');
        for p in &self.properties {
            out.push_str(&format!(
                "{}|{:?}|{:?}|{:?}|{}|{}|{}\n",
                p.path,
                p.reference_type,
                p.access_mode,
                p.archive_policy,
                p.default.as_deref().unwrap_or(""),
                p.tags.join(","),
                p.options.as_deref().unwrap_or(""),
            ));
        }
        out
    }

    /// Content digest used to de-duplicate schema revisions. A stable,
    /// dependency-free FNV-1a hash is enough here: this digest never leaves
    /// the process boundary (it's only compared against itself), so
    /// collision resistance against an adversary is not a requirement.
    pub fn digest(&self) -> String {
        fnv1a_hex(self.canonical_blob().as_bytes())
    }

    pub fn properties_by_path(&self) -> BTreeMap<&str, &PropertySchema> {
        self.properties.iter().map(|p| (p.path.as_str(), p)).collect()
    }
}

fn fnv1a_hex(bytes: &[u8]) -> String {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    format!("{hash:016x}")
}
