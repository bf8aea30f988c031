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

//! The backend client: an async, connection-pooled transport to the
//! time-series store.
//!
//! `Backend` is a trait object behind an `Arc`, so production code can swap
//! in a real HTTP-backed store while tests plug in an in-memory fake;
//! [`BackendClient`] wraps whichever one is configured and adds a semaphore
//! to bound (not serialize) concurrent requests.

pub mod codec;
pub mod influx;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;

pub type Result<T> = std::result::Result<T, BackendError>;

/// One line-protocol record ready to be written:
/// `<measurement>,<tagKey>=<tagVal>,... <fieldKey>=<fieldVal>,... <timestampMicros>`.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRecord {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, String)>,
    pub timestamp_micros: i64,
}

impl LineRecord {
    pub fn to_line(&self) -> String {
        let mut line = self.measurement.clone();
        for (k, v) in &self.tags {
            line.push(',');
            line.push_str(k);
            line.push('=');
            line.push_str(&escape_tag(v));
        }
        line.push(' ');
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        line.push_str(&fields);
        line.push(' ');
        line.push_str(&self.timestamp_micros.to_string());
        line
    }
}

fn escape_tag(v: &str) -> String {
    v.replace(' ', "\\ ").replace(',', "\\,").replace('=', "\\=")
}

/// Parsed reply from a `queryDb`-style call: a flat list of JSON rows, kept
/// as `serde_json::Value` because the row shape depends on the query and
/// this layer does not interpret it -- the Reader does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<serde_json::Value>,
}

/// The storage-backend abstraction. Implemented by [`influx::InfluxBackend`]
/// for production and by a fake in-memory store for tests.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn write_batch(&self, measurement: &str, lines: Vec<LineRecord>) -> Result<()>;
    async fn query(&self, query_text: &str) -> Result<QueryResult>;
}

/// A cheaply-cloneable handle to a [`Backend`], bounding the number of
/// in-flight requests with a semaphore. Concurrency is desirable here (unlike
/// a single-writer embedded database), so the semaphore only bounds it
/// rather than collapsing it to one.
#[derive(Clone)]
pub struct BackendClient {
    backend: Arc<dyn Backend>,
    in_flight: Arc<tokio::sync::Semaphore>,
    request_timeout: std::time::Duration,
}

impl BackendClient {
    pub fn new(
        backend: Arc<dyn Backend>,
        max_in_flight: usize,
        request_timeout: std::time::Duration,
    ) -> Self {
        Self {
            backend,
            in_flight: Arc::new(tokio::sync::Semaphore::new(max_in_flight.max(1))),
            request_timeout,
        }
    }

    pub async fn write_batch(&self, measurement: &str, lines: Vec<LineRecord>) -> Result<()> {
        let _permit =
            self.in_flight.clone().acquire_owned().await.expect("semaphore never closed");
        tokio::time::timeout(self.request_timeout, self.backend.write_batch(measurement, lines))
            .await
            .map_err(|_| BackendError::Timeout)?
    }

    pub async fn query(&self, query_text: &str) -> Result<QueryResult> {
        let _permit =
            self.in_flight.clone().acquire_owned().await.expect("semaphore never closed");
        tokio::time::timeout(self.request_timeout, self.backend.query(query_text))
            .await
            .map_err(|_| BackendError::Timeout)?
    }

    /// Returns a cheap handle suitable for the read-only path.
    pub fn read_client(&self) -> BackendClient {
        self.clone()
    }
}
