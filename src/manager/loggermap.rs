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

//! Persistence for the logger map: a small XML-shaped artifact named
//! `loggermap.xml`.
//!
//! Read/written with `quick-xml`'s serde integration; rewritten atomically
//! via a temp-file-then-rename so a reader never observes a torn file.

use std::collections::HashSet;
use std::path::Path;

use crate::error::ManagerError;

/// One row of the persisted map: a device, the data-logger instance that
/// owns it, and the logger server it runs on.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LoggerMapEntry {
    pub device: String,
    #[serde(rename = "dataLogger")]
    pub data_logger: String,
    #[serde(rename = "loggerServer")]
    pub logger_server: String,
}

/// The full persisted map: an ordered list of [`LoggerMapEntry`] rows.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename = "loggerMap")]
pub struct LoggerMap {
    #[serde(rename = "entry", default)]
    pub entries: Vec<LoggerMapEntry>,
}

impl LoggerMap {
    /// Every logger server referenced by this map, as required by the
    /// `serverList` consistency check.
    pub fn referenced_servers(&self) -> HashSet<&str> {
        self.entries.iter().map(|e| e.logger_server.as_str()).collect()
    }

    pub fn contains_device(&self, device_id: &str) -> bool {
        self.entries.iter().any(|e| e.device == device_id)
    }

    pub fn entry_for(&self, device_id: &str) -> Option<&LoggerMapEntry> {
        self.entries.iter().find(|e| e.device == device_id)
    }

    /// Loads the map from `path`, or returns an empty map if the file does
    /// not exist yet (a fresh deployment's first start).
    pub async fn load(path: &Path) -> Result<LoggerMap, ManagerError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => quick_xml::de::from_str(&text)
                .map_err(|e| ManagerError::Persistence(format!("failed to parse {path:?}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LoggerMap::default()),
            Err(e) => Err(ManagerError::Persistence(format!("failed to read {path:?}: {e}"))),
        }
    }

    /// Rewrites `path` atomically: serialize to a sibling temp file, then
    /// rename over the target so a reader never observes a partial file.
    pub async fn save(&self, path: &Path) -> Result<(), ManagerError> {
        let xml = quick_xml::se::to_string(self)
            .map_err(|e| ManagerError::Persistence(format!("failed to serialize map: {e}")))?;

        let tmp_path = path.with_extension("xml.tmp");
        tokio::fs::write(&tmp_path, xml.as_bytes())
            .await
            .map_err(|e| ManagerError::Persistence(format!("failed to write {tmp_path:?}: {e}")))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| ManagerError::Persistence(format!("failed to rename into {path:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_file_returns_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loggermap.xml");
        let map = LoggerMap::load(&path).await.unwrap();
        assert!(map.entries.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loggermap.xml");

        let map = LoggerMap {
            entries: vec![LoggerMapEntry {
                device: "dev1".to_owned(),
                data_logger: "DataLogger-server1".to_owned(),
                logger_server: "server1".to_owned(),
            }],
        };
        map.save(&path).await.unwrap();

        let loaded = LoggerMap::load(&path).await.unwrap();
        assert_eq!(map, loaded);
    }

    #[test]
    fn test_referenced_servers() {
        let map = LoggerMap {
            entries: vec![
                LoggerMapEntry {
                    device: "dev1".to_owned(),
                    data_logger: "DataLogger-server1".to_owned(),
                    logger_server: "server1".to_owned(),
                },
                LoggerMapEntry {
                    device: "dev2".to_owned(),
                    data_logger: "DataLogger-server2".to_owned(),
                    logger_server: "server2".to_owned(),
                },
            ],
        };
        let servers = map.referenced_servers();
        assert!(servers.contains("server1"));
        assert!(servers.contains("server2"));
    }
}
