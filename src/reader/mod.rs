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

//! The Log Reader: the read path.
//!
//! A cheap, `Clone`-able front bound to a [`crate::backend::BackendClient`],
//! with no mutable loop task of its own -- every read is a self-contained
//! backend round trip, unlike the Logger's single-writer design.

pub mod config_at_time;
pub mod history;
pub(crate) mod query;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::codec::json_to_value;
use crate::backend::{BackendClient, QueryResult};
use crate::config::Config;
use crate::error::ReaderError;
use crate::logger::DEVICE_GONE_PATH;
use crate::schema::DeviceSchema;
use crate::timestamp::Timestamp;
use crate::value::{ReferenceType, Value};

pub type Result<T> = std::result::Result<T, ReaderError>;

/// One value observed at a point in time, as returned from the history and
/// configuration-at-time queries.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub value: Value,
    pub stamp: Timestamp,
}

/// One row of `slotGetBadData`'s reply.
#[derive(Debug, Clone, PartialEq)]
pub struct BadDataEntry {
    pub reason: String,
    pub info: String,
    pub stamp: Timestamp,
}

/// The reconstructed device configuration at a point in time, as returned by
/// `slotGetConfigurationFromPast`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationAtTime {
    pub config_hash: String,
    pub schema: DeviceSchema,
    pub config_at_time_flag: bool,
    pub config_timepoint: String,
    pub properties: HashMap<String, DataPoint>,
}

/// Log Reader state machine: `On -> Error` on the
/// first failed backend access. Unlike the Logger there is no automatic
/// retry-then-recover; a reader that has seen one backend failure keeps
/// reporting `Error` until a fresh instance replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    On,
    Error,
}

/// Public, cheaply-`Clone`-able handle to the read path.
#[derive(Clone)]
pub struct LogReader {
    backend: BackendClient,
    max_history_size: u64,
    num_get_property_history: Arc<AtomicU64>,
    num_get_configuration_from_past: Arc<AtomicU64>,
    state: Arc<Mutex<ReaderState>>,
}

impl LogReader {
    pub fn new(config: &Config, backend: BackendClient) -> Self {
        Self {
            backend,
            max_history_size: config.max_history_size,
            num_get_property_history: Arc::new(AtomicU64::new(0)),
            num_get_configuration_from_past: Arc::new(AtomicU64::new(0)),
            state: Arc::new(Mutex::new(ReaderState::On)),
        }
    }

    pub fn max_history_size(&self) -> u64 {
        self.max_history_size
    }

    pub fn num_get_property_history(&self) -> u64 {
        self.num_get_property_history.load(Ordering::Relaxed)
    }

    pub fn num_get_configuration_from_past(&self) -> u64 {
        self.num_get_configuration_from_past.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> ReaderState {
        *self.state.lock().unwrap()
    }

    /// `slotGetPropertyHistory`.
    ///
    /// Returns every sample in `[from, to]` when there are at most
    /// `max_num_data` of them; otherwise down-samples to exactly
    /// `max_num_data` points: numeric scalars are bucket-averaged, anything
    /// else (strings, vectors, tables) is picked by deterministic uniform
    /// selection.
    pub async fn slot_get_property_history(
        &self,
        device_id: &str,
        path: &str,
        from: Timestamp,
        to: Timestamp,
        max_num_data: u64,
    ) -> Result<Vec<DataPoint>> {
        self.num_get_property_history.fetch_add(1, Ordering::Relaxed);

        if max_num_data > self.max_history_size {
            return Err(ReaderError::MaxNumDataOutOfRange {
                requested: max_num_data,
                limit: self.max_history_size,
            });
        }

        let chain = self.fetch_schema_chain(device_id, to.to_micros()).await?;

        let query_text = query::history_query(device_id, path, from.to_micros(), to.to_micros());
        let result = self.run_query(&query_text).await?;

        let mut points = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let stamp = Timestamp::from_micros(row["time"].as_i64().unwrap_or(0));
            let reference_type = resolve_reference_type(&chain, path, stamp);
            let value = json_to_value(&row["value"], reference_type);
            points.push(DataPoint { value, stamp });
        }

        if max_num_data == 0 || (points.len() as u64) <= max_num_data {
            return Ok(points);
        }

        let all_numeric = points.iter().all(|p| is_numeric_scalar(p.value.reference_type()));
        if all_numeric {
            let numeric: Vec<(Timestamp, f64)> =
                points.iter().map(|p| (p.stamp, to_f64(&p.value))).collect();
            let bucketed = history::bucket_average(&numeric, from, to, max_num_data as usize);
            Ok(bucketed
                .into_iter()
                .map(|(stamp, v)| DataPoint { value: Value::Double(v), stamp })
                .collect())
        } else {
            Ok(history::uniform_select(&points, max_num_data as usize))
        }
    }

    /// `slotGetConfigurationFromPast`.
    pub async fn slot_get_configuration_from_past(
        &self,
        device_id: &str,
        at_time: Timestamp,
    ) -> Result<ConfigurationAtTime> {
        self.num_get_configuration_from_past.fetch_add(1, Ordering::Relaxed);

        let chain = self.fetch_schema_chain(device_id, at_time.to_micros()).await?;
        let (first_seen_at, schema) = chain.last().cloned().ok_or(ReaderError::NoSchemaBeforeTime)?;

        let mut properties = HashMap::new();
        let mut stamps = Vec::new();
        for prop in &schema.properties {
            let query_text =
                query::history_query(device_id, &prop.path, 0, at_time.to_micros());
            let result = self.run_query(&query_text).await?;
            if let Some(row) = result.rows.last() {
                let stamp = Timestamp::from_micros(row["time"].as_i64().unwrap_or(0));
                let value = json_to_value(&row["value"], prop.reference_type);
                stamps.push(stamp);
                properties.insert(prop.path.clone(), DataPoint { value, stamp });
            }
        }

        let gone_query = query::history_query(device_id, DEVICE_GONE_PATH, 0, at_time.to_micros());
        let gone_result = self.run_query(&gone_query).await?;
        let gone_stamps: Vec<Timestamp> = gone_result
            .rows
            .iter()
            .map(|row| Timestamp::from_micros(row["time"].as_i64().unwrap_or(0)))
            .collect();

        let last_value_stamp = stamps.iter().copied().max().unwrap_or(first_seen_at);
        let flag = config_at_time::config_at_time_flag(&gone_stamps, last_value_stamp, at_time);
        let config_timepoint = config_at_time::config_timepoint(&stamps).unwrap_or(first_seen_at);

        Ok(ConfigurationAtTime {
            config_hash: schema.digest(),
            schema,
            config_at_time_flag: flag,
            config_timepoint: config_timepoint.to_iso8601_micros(),
            properties,
        })
    }

    /// `slotGetBadData`: every bad-data row across all devices in
    /// `[from, to]`, grouped by device.
    pub async fn slot_get_bad_data(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<HashMap<String, Vec<BadDataEntry>>> {
        let query_text = query::bad_data_query(from.to_micros(), to.to_micros());
        let result = self.run_query(&query_text).await?;

        let mut out: HashMap<String, Vec<BadDataEntry>> = HashMap::new();
        for row in &result.rows {
            let device = row["device"].as_str().unwrap_or_default().to_owned();
            let entry = BadDataEntry {
                reason: row["reason"].as_str().unwrap_or_default().to_owned(),
                info: row["info"].as_str().unwrap_or_default().to_owned(),
                stamp: Timestamp::from_micros(row["time"].as_i64().unwrap_or(0)),
            };
            out.entry(device).or_default().push(entry);
        }
        Ok(out)
    }

    async fn run_query(&self, query_text: &str) -> Result<QueryResult> {
        match self.backend.query(query_text).await {
            Ok(result) => Ok(result),
            Err(e) => {
                log::error!("Backend query failed, Log Reader entering ERROR state: {e}");
                *self.state.lock().unwrap() = ReaderState::Error;
                Err(ReaderError::Backend(e))
            }
        }
    }

    /// Reconstructs every schema revision of `device_id` at or before
    /// `to_micros`, in chronological order. Schema chunks written by
    /// [`crate::logger`] share a timestamp per revision and are
    /// reassembled by concatenating `blob` fields in `chunk_index` order.
    async fn fetch_schema_chain(
        &self,
        device_id: &str,
        to_micros: i64,
    ) -> Result<Vec<(Timestamp, DeviceSchema)>> {
        let query_text = query::schema_query(device_id, to_micros);
        let result = self.run_query(&query_text).await?;

        let mut groups: Vec<(i64, Vec<&serde_json::Value>)> = Vec::new();
        for row in &result.rows {
            let t = row["time"].as_i64().unwrap_or(0);
            match groups.last_mut() {
                Some((last_t, rows)) if *last_t == t => rows.push(row),
                _ => groups.push((t, vec![row])),
            }
        }

        let mut chain = Vec::with_capacity(groups.len());
        for (t, mut rows) in groups {
            rows.sort_by_key(|r| r["chunk_index"].as_i64().unwrap_or(0));
            let blob: String =
                rows.iter().map(|r| r["blob"].as_str().unwrap_or_default()).collect();
            let schema: DeviceSchema = serde_json::from_str(&blob).map_err(|e| {
                ReaderError::Backend(crate::error::BackendError::Parse(e.to_string()))
            })?;
            chain.push((Timestamp::from_micros(t), schema));
        }
        // `schema_query` orders rows newest-first; restore chronological order.
        chain.reverse();
        Ok(chain)
    }
}

/// Finds the reference type that applied to `path` at `stamp`, walking the
/// chronological schema chain backwards for the latest revision at or
/// before `stamp` that declares it; falls back to any revision that ever
/// declared it, then to [`ReferenceType::String`] as a last resort.
fn resolve_reference_type(
    chain: &[(Timestamp, DeviceSchema)],
    path: &str,
    stamp: Timestamp,
) -> ReferenceType {
    chain
        .iter()
        .rev()
        .find(|(first_seen_at, schema)| *first_seen_at <= stamp && schema.property(path).is_some())
        .or_else(|| chain.iter().rev().find(|(_, schema)| schema.property(path).is_some()))
        .and_then(|(_, schema)| schema.property(path))
        .map(|p| p.reference_type)
        .unwrap_or(ReferenceType::String)
}

fn is_numeric_scalar(rt: ReferenceType) -> bool {
    matches!(
        rt,
        ReferenceType::I8
            | ReferenceType::U8
            | ReferenceType::I16
            | ReferenceType::U16
            | ReferenceType::I32
            | ReferenceType::U32
            | ReferenceType::I64
            | ReferenceType::U64
            | ReferenceType::Float
            | ReferenceType::Double
    )
}

fn to_f64(value: &Value) -> f64 {
    match value {
        Value::I8(v) => *v as f64,
        Value::U8(v) => *v as f64,
        Value::I16(v) => *v as f64,
        Value::U16(v) => *v as f64,
        Value::I32(v) => *v as f64,
        Value::U32(v) => *v as f64,
        Value::I64(v) => *v as f64,
        Value::U64(v) => *v as f64,
        Value::Float(v) => *v as f64,
        Value::Double(v) => *v,
        _ => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendClient, LineRecord};
    use crate::config::BackendConfig;
    use crate::schema::{AccessMode, ArchivePolicy, PropertySchema};
    use crate::testutils::MemoryBackend;
    use std::time::Duration;

    fn test_config() -> Config {
        Config::with_defaults(
            vec!["server1".to_owned()],
            BackendConfig {
                url_write: String::new(),
                user_write: String::new(),
                password_write: String::new(),
                url_read: String::new(),
                user_read: String::new(),
                password_read: String::new(),
                dbname: "test".to_owned(),
            },
        )
    }

    fn sample_schema() -> DeviceSchema {
        DeviceSchema {
            device_id: "dev1".to_owned(),
            properties: vec![PropertySchema {
                path: "p".to_owned(),
                reference_type: ReferenceType::I32,
                access_mode: AccessMode::ReadOnly,
                archive_policy: ArchivePolicy::Archive,
                default: None,
                tags: vec![],
                options: None,
            }],
        }
    }

    async fn write_schema(memory: &MemoryBackend, device: &str, schema: &DeviceSchema, at_micros: i64) {
        let blob = serde_json::to_string(schema).unwrap();
        memory
            .write_batch(
                &format!("{device}__SCHEMAS"),
                vec![LineRecord {
                    measurement: format!("{device}__SCHEMAS"),
                    tags: vec![("digest".to_owned(), schema.digest())],
                    fields: vec![
                        ("chunk_index".to_owned(), "0i".to_owned()),
                        ("size".to_owned(), format!("{}i", blob.len())),
                        ("blob".to_owned(), format!("\"{}\"", blob.replace('"', "\\\""))),
                    ],
                    timestamp_micros: at_micros,
                }],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_property_history_returns_all_points_under_limit() {
        let memory = Arc::new(MemoryBackend::new());
        write_schema(&memory, "dev1", &sample_schema(), 0).await;
        memory
            .write_batch(
                "dev1",
                vec![LineRecord {
                    measurement: "dev1".to_owned(),
                    tags: vec![("path".to_owned(), "p".to_owned())],
                    fields: vec![("value".to_owned(), "7i".to_owned())],
                    timestamp_micros: 100,
                }],
            )
            .await
            .unwrap();

        let backend = BackendClient::new(memory, 8, Duration::from_secs(5));
        let reader = LogReader::new(&test_config(), backend);

        let points = reader
            .slot_get_property_history("dev1", "p", Timestamp::new(0, 0), Timestamp::new(1, 0), 100)
            .await
            .unwrap();
        assert_eq!(1, points.len());
        assert_eq!(Value::I32(7), points[0].value);
    }

    #[tokio::test]
    async fn test_property_history_downsamples_numeric_series() {
        let memory = Arc::new(MemoryBackend::new());
        write_schema(&memory, "dev1", &sample_schema(), 0).await;
        for i in 0..20 {
            memory
                .write_batch(
                    "dev1",
                    vec![LineRecord {
                        measurement: "dev1".to_owned(),
                        tags: vec![("path".to_owned(), "p".to_owned())],
                        fields: vec![("value".to_owned(), format!("{i}i"))],
                        timestamp_micros: i * 1_000_000,
                    }],
                )
                .await
                .unwrap();
        }

        let backend = BackendClient::new(memory, 8, Duration::from_secs(5));
        let reader = LogReader::new(&test_config(), backend);

        let points = reader
            .slot_get_property_history(
                "dev1",
                "p",
                Timestamp::new(0, 0),
                Timestamp::new(19, 0),
                5,
            )
            .await
            .unwrap();
        assert_eq!(5, points.len());
    }

    fn schema_with_property_type(reference_type: ReferenceType) -> DeviceSchema {
        DeviceSchema {
            device_id: "dev1".to_owned(),
            properties: vec![PropertySchema {
                path: "p".to_owned(),
                reference_type,
                access_mode: AccessMode::ReadOnly,
                archive_policy: ArchivePolicy::Archive,
                default: None,
                tags: vec![],
                options: None,
            }],
        }
    }

    async fn write_value(memory: &MemoryBackend, device: &str, value: &Value, at_micros: i64) {
        memory
            .write_batch(
                device,
                vec![LineRecord {
                    measurement: device.to_owned(),
                    tags: vec![("path".to_owned(), "p".to_owned())],
                    fields: vec![("value".to_owned(), value.to_line_protocol_field())],
                    timestamp_micros: at_micros,
                }],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_property_history_spans_schema_type_change() {
        let memory = Arc::new(MemoryBackend::new());

        write_schema(&memory, "dev1", &schema_with_property_type(ReferenceType::String), 0).await;
        write_value(&memory, "dev1", &Value::String("Non empty str".to_owned()), 5).await;

        write_schema(&memory, "dev1", &schema_with_property_type(ReferenceType::VectorString), 10)
            .await;
        let vector_value = Value::VectorString(vec![
            "a".to_owned(),
            "".to_owned(),
            "b".to_owned(),
            "c".to_owned(),
        ]);
        write_value(&memory, "dev1", &vector_value, 15).await;

        write_schema(&memory, "dev1", &schema_with_property_type(ReferenceType::I32), 20).await;
        write_value(&memory, "dev1", &Value::I32(10), 25).await;

        let backend = BackendClient::new(memory, 8, Duration::from_secs(5));
        let reader = LogReader::new(&test_config(), backend);

        let points = reader
            .slot_get_property_history("dev1", "p", Timestamp::new(0, 0), Timestamp::new(30, 0), 10)
            .await
            .unwrap();

        assert_eq!(3, points.len());
        assert_eq!(Value::String("Non empty str".to_owned()), points[0].value);
        assert_eq!(vector_value, points[1].value);
        assert_eq!(Value::I32(10), points[2].value);
    }

    #[tokio::test]
    async fn test_max_num_data_out_of_range_is_rejected() {
        let memory = Arc::new(MemoryBackend::new());
        let backend = BackendClient::new(memory, 8, Duration::from_secs(5));
        let mut config = test_config();
        config.max_history_size = 10;
        let reader = LogReader::new(&config, backend);

        let result = reader
            .slot_get_property_history("dev1", "p", Timestamp::new(0, 0), Timestamp::new(1, 0), 11)
            .await;
        assert!(matches!(result, Err(ReaderError::MaxNumDataOutOfRange { requested: 11, limit: 10 })));
    }

    #[tokio::test]
    async fn test_configuration_from_past_without_schema_errors() {
        let memory = Arc::new(MemoryBackend::new());
        let backend = BackendClient::new(memory, 8, Duration::from_secs(5));
        let reader = LogReader::new(&test_config(), backend);

        let result = reader.slot_get_configuration_from_past("dev1", Timestamp::new(100, 0)).await;
        assert!(matches!(result, Err(ReaderError::NoSchemaBeforeTime)));
    }

    #[tokio::test]
    async fn test_configuration_from_past_flag_false_after_device_gone() {
        let memory = Arc::new(MemoryBackend::new());
        write_schema(&memory, "dev1", &sample_schema(), 0).await;
        memory
            .write_batch(
                "dev1",
                vec![LineRecord {
                    measurement: "dev1".to_owned(),
                    tags: vec![("path".to_owned(), "p".to_owned())],
                    fields: vec![("value".to_owned(), "1i".to_owned())],
                    timestamp_micros: 10,
                }],
            )
            .await
            .unwrap();
        memory
            .write_batch(
                "dev1",
                vec![LineRecord {
                    measurement: "dev1".to_owned(),
                    tags: vec![("path".to_owned(), DEVICE_GONE_PATH.to_owned())],
                    fields: vec![("value".to_owned(), "true".to_owned())],
                    timestamp_micros: 15,
                }],
            )
            .await
            .unwrap();

        let backend = BackendClient::new(memory, 8, Duration::from_secs(5));
        let reader = LogReader::new(&test_config(), backend);

        let config = reader
            .slot_get_configuration_from_past("dev1", Timestamp::new(20, 0))
            .await
            .unwrap();
        assert!(!config.config_at_time_flag);
    }

    #[tokio::test]
    async fn test_bad_data_query_groups_by_device() {
        let memory = Arc::new(MemoryBackend::new());
        memory
            .write_batch(
                "dev1__BAD_DATA",
                vec![LineRecord {
                    measurement: "dev1__BAD_DATA".to_owned(),
                    tags: vec![("reason".to_owned(), "OversizeString".to_owned())],
                    fields: vec![("info".to_owned(), "\"too big\"".to_owned())],
                    timestamp_micros: 5,
                }],
            )
            .await
            .unwrap();

        let backend = BackendClient::new(memory, 8, Duration::from_secs(5));
        let reader = LogReader::new(&test_config(), backend);

        let grouped = reader.slot_get_bad_data(Timestamp::new(0, 0), Timestamp::new(100, 0)).await.unwrap();
        assert_eq!(1, grouped.get("dev1").unwrap().len());
    }
}
