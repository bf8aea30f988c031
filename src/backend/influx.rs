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

//! InfluxDB-compatible [`super::Backend`] implementation: batched
//! line-protocol writes over HTTP, a SQL-like query dialect with
//! microsecond-suffixed time literals.

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, LineRecord, QueryResult, Result};
use crate::config::BackendConfig;
use crate::error::BackendError;

/// A [`Backend`] backed by a real InfluxDB-compatible HTTP endpoint.
///
/// Holds one `reqwest::Client` (itself internally connection-pooled) and the
/// four URL/user/password pairs from [`BackendConfig`].
pub struct InfluxBackend {
    http: Client,
    config: BackendConfig,
}

impl InfluxBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { http: Client::new(), config }
    }

    fn write_url(&self) -> String {
        format!("{}/write?db={}&precision=u", self.config.url_write, self.config.dbname)
    }

    fn query_url(&self) -> String {
        format!("{}/query?db={}", self.config.url_read, self.config.dbname)
    }
}

#[async_trait]
impl Backend for InfluxBackend {
    async fn write_batch(&self, _measurement: &str, lines: Vec<LineRecord>) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let body =
            lines.iter().map(LineRecord::to_line).collect::<Vec<_>>().join("\n");

        let resp = self
            .http
            .post(self.write_url())
            .basic_auth(&self.config.user_write, Some(&self.config.password_write))
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Http(format!("write failed with {status}: {text}")));
        }
        Ok(())
    }

    async fn query(&self, query_text: &str) -> Result<QueryResult> {
        let resp = self
            .http
            .get(self.query_url())
            .query(&[("q", query_text)])
            .basic_auth(&self.config.user_read, Some(&self.config.password_read))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Http(format!("query failed with {status}: {text}")));
        }

        let body: serde_json::Value = resp.json().await?;
        let rows = extract_rows(&body);
        Ok(QueryResult { rows })
    }
}

/// Flattens InfluxDB's nested `{results: [{series: [{columns, values}]}]}`
/// reply shape into one JSON object per row, keyed by column name. Kept
/// separate from [`InfluxBackend::query`] so it can be unit-tested against a
/// literal JSON fixture without a live server.
fn extract_rows(body: &serde_json::Value) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    let Some(results) = body.get("results").and_then(|v| v.as_array()) else {
        return out;
    };
    for result in results {
        let Some(series_list) = result.get("series").and_then(|v| v.as_array()) else {
            continue;
        };
        for series in series_list {
            let Some(columns) = series.get("columns").and_then(|v| v.as_array()) else {
                continue;
            };
            let Some(values) = series.get("values").and_then(|v| v.as_array()) else {
                continue;
            };
            for row in values {
                let Some(row) = row.as_array() else { continue };
                let mut obj = serde_json::Map::new();
                for (col, val) in columns.iter().zip(row.iter()) {
                    if let Some(col_name) = col.as_str() {
                        obj.insert(col_name.to_owned(), val.clone());
                    }
                }
                out.push(serde_json::Value::Object(obj));
            }
        }
    }
    out
}

/// Formats a timestamp expressed in microseconds as a microsecond-suffixed
/// time literal for the query dialect (suffixed by `u`).
pub fn time_literal(micros: i64) -> String {
    format!("{micros}u")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_rows_flattens_columns_and_values() {
        let body = serde_json::json!({
            "results": [{
                "series": [{
                    "columns": ["time", "value"],
                    "values": [["2024-01-01T00:00:00Z", 10], ["2024-01-01T00:00:01Z", 20]],
                }],
            }],
        });
        let rows = extract_rows(&body);
        assert_eq!(2, rows.len());
        assert_eq!(10, rows[0]["value"]);
        assert_eq!(20, rows[1]["value"]);
    }

    #[test]
    fn test_extract_rows_empty_when_no_series() {
        let body = serde_json::json!({"results": [{"statement_id": 0}]});
        assert!(extract_rows(&body).is_empty());
    }

    #[test]
    fn test_time_literal_suffix() {
        assert_eq!("12345u", time_literal(12345));
    }
}
