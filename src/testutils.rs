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

//! Shared test helpers: an in-memory fake [`crate::backend::Backend`] plus a
//! few fixture builders used across the Logger/Reader/Manager test modules.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::codec::line_field_to_json;
use crate::backend::{Backend, LineRecord, QueryResult};
use crate::error::BackendError;
use crate::reader::query::parse_query;

/// An in-memory [`Backend`] that stores every line ever written, in
/// arrival order, per measurement, and answers the query grammar built by
/// [`crate::reader::query`].
#[derive(Default)]
pub(crate) struct MemoryBackend {
    measurements: Mutex<HashMap<String, Vec<LineRecord>>>,
    fail_next: Mutex<usize>,
}

impl MemoryBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Forces the next `n` write attempts to fail, to exercise the
    /// logger's retry-then-ERROR path.
    pub(crate) fn fail_next_writes(&self, n: usize) {
        *self.fail_next.lock().unwrap() = n;
    }

    /// Returns every line ever written to `measurement`, in arrival order.
    pub(crate) fn written_lines(&self, measurement: &str) -> Vec<LineRecord> {
        self.measurements.lock().unwrap().get(measurement).cloned().unwrap_or_default()
    }

    fn line_to_row(line: &LineRecord, extra_device_column: Option<&str>) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("time".to_owned(), serde_json::json!(line.timestamp_micros));
        for (k, v) in &line.tags {
            obj.insert(k.clone(), serde_json::json!(v));
        }
        for (k, v) in &line.fields {
            obj.insert(k.clone(), line_field_to_json(v));
        }
        if let Some(device) = extra_device_column {
            obj.insert("device".to_owned(), serde_json::json!(device));
        }
        serde_json::Value::Object(obj)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn write_batch(&self, measurement: &str, lines: Vec<LineRecord>) -> crate::backend::Result<()> {
        {
            let mut fail_next = self.fail_next.lock().unwrap();
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(BackendError::Http("forced failure for testing".to_owned()));
            }
        }
        self.measurements.lock().unwrap().entry(measurement.to_owned()).or_default().extend(lines);
        Ok(())
    }

    async fn query(&self, query_text: &str) -> crate::backend::Result<QueryResult> {
        let parsed = parse_query(query_text);
        let measurements = self.measurements.lock().unwrap();

        let mut rows = Vec::new();
        if let Some(name) = &parsed.measurement_literal {
            if let Some(lines) = measurements.get(name) {
                for line in lines {
                    if matches_filters(line, &parsed) {
                        rows.push(Self::line_to_row(line, None));
                    }
                }
            }
        } else if let Some(pattern) = &parsed.measurement_suffix_regex {
            let suffix = pattern.trim_start_matches(".*");
            for (name, lines) in measurements.iter() {
                if !name.ends_with(suffix) {
                    continue;
                }
                let device = &name[..name.len() - suffix.len()];
                for line in lines {
                    if matches_filters(line, &parsed) {
                        rows.push(Self::line_to_row(line, Some(device)));
                    }
                }
            }
        }

        if parsed.order_desc {
            rows.sort_by_key(|r| -r["time"].as_i64().unwrap_or(0));
        } else {
            rows.sort_by_key(|r| r["time"].as_i64().unwrap_or(0));
        }

        Ok(QueryResult { rows })
    }
}

fn matches_filters(line: &LineRecord, parsed: &crate::reader::query::ParsedQuery) -> bool {
    if let Some(path) = &parsed.path_equals {
        let has_path = line.tags.iter().any(|(k, v)| k == "path" && v == path);
        if !has_path {
            return false;
        }
    }
    if let Some(from) = parsed.time_from_micros {
        if line.timestamp_micros < from {
            return false;
        }
    }
    if let Some(to) = parsed.time_to_micros {
        if line.timestamp_micros > to {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::query::{bad_data_query, history_query};

    #[tokio::test]
    async fn test_write_then_query_roundtrip() {
        let backend = MemoryBackend::new();
        backend
            .write_batch(
                "dev1",
                vec![LineRecord {
                    measurement: "dev1".to_owned(),
                    tags: vec![("path".to_owned(), "p".to_owned())],
                    fields: vec![("value".to_owned(), "10i".to_owned())],
                    timestamp_micros: 100,
                }],
            )
            .await
            .unwrap();

        let result = backend.query(&history_query("dev1", "p", 0, 200)).await.unwrap();
        assert_eq!(1, result.rows.len());
        assert_eq!(10, result.rows[0]["value"]);
    }

    #[tokio::test]
    async fn test_forced_failure() {
        let backend = MemoryBackend::new();
        backend.fail_next_writes(1);
        let result = backend.write_batch("dev1", vec![]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_bad_data_query_spans_measurements() {
        let backend = MemoryBackend::new();
        backend
            .write_batch(
                "dev1__BAD_DATA",
                vec![LineRecord {
                    measurement: "dev1__BAD_DATA".to_owned(),
                    tags: vec![],
                    fields: vec![("info".to_owned(), "\"oops\"".to_owned())],
                    timestamp_micros: 50,
                }],
            )
            .await
            .unwrap();

        let result = backend.query(&bad_data_query(0, 1000)).await.unwrap();
        assert_eq!(1, result.rows.len());
        assert_eq!("dev1", result.rows[0]["device"]);
    }
}
