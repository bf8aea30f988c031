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

//! Query text construction for the read path: a SQL-like dialect with
//! micro-second time literals suffixed by `u`.
//!
//! [`MemoryBackend`](crate::testutils::MemoryBackend) parses this same
//! shape back with [`parse_query`] so the in-memory test double exercises
//! the same query grammar [`crate::backend::influx::InfluxBackend`] would
//! send to a real server, rather than special-casing test behavior.

/// Builds the query for `slotGetPropertyHistory`: every row for one
/// `(device, path)` pair within `[from_micros, to_micros]`, oldest first.
pub fn history_query(device: &str, path: &str, from_micros: i64, to_micros: i64) -> String {
    format!(
        "SELECT * FROM \"{device}\" WHERE path='{path}' AND time >= {from_micros}u AND time <= {to_micros}u ORDER BY time ASC"
    )
}

/// Builds the query for the schema-at-time lookup: every chunk row at or
/// before `at_micros`, newest first (the caller takes the first distinct
/// timestamp group).
pub fn schema_query(device: &str, at_micros: i64) -> String {
    format!(
        "SELECT * FROM \"{device}__SCHEMAS\" WHERE time <= {at_micros}u ORDER BY time DESC"
    )
}

/// Builds the query for `slotGetBadData`: every bad-data row across all
/// devices within `[from_micros, to_micros]`, via a measurement-name regex
/// match against the `<deviceId>__BAD_DATA` naming convention.
pub fn bad_data_query(from_micros: i64, to_micros: i64) -> String {
    format!(
        "SELECT * FROM /.*__BAD_DATA/ WHERE time >= {from_micros}u AND time <= {to_micros}u ORDER BY time ASC"
    )
}

/// A minimally-parsed query, enough for [`crate::testutils::MemoryBackend`]
/// to answer the three query shapes above without a real SQL engine.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedQuery {
    pub measurement_literal: Option<String>,
    pub measurement_suffix_regex: Option<String>,
    pub path_equals: Option<String>,
    pub time_from_micros: Option<i64>,
    pub time_to_micros: Option<i64>,
    pub order_desc: bool,
}

pub(crate) fn parse_query(text: &str) -> ParsedQuery {
    let mut measurement_literal = None;
    let mut measurement_suffix_regex = None;

    if let Some(from_idx) = text.find("FROM ") {
        let after = &text[from_idx + 5..];
        if let Some(rest) = after.strip_prefix('"') {
            if let Some(end) = rest.find('"') {
                measurement_literal = Some(rest[..end].to_owned());
            }
        } else if let Some(rest) = after.strip_prefix('/') {
            if let Some(end) = rest.find('/') {
                measurement_suffix_regex = Some(rest[..end].to_owned());
            }
        }
    }

    let path_equals = text.find("path='").map(|idx| {
        let rest = &text[idx + "path='".len()..];
        let end = rest.find('\'').unwrap_or(rest.len());
        rest[..end].to_owned()
    });

    let time_from_micros = extract_time(text, "time >= ");
    let time_to_micros = extract_time(text, "time <= ");
    let order_desc = text.contains("ORDER BY time DESC");

    ParsedQuery {
        measurement_literal,
        measurement_suffix_regex,
        path_equals,
        time_from_micros,
        time_to_micros,
        order_desc,
    }
}

fn extract_time(text: &str, marker: &str) -> Option<i64> {
    let idx = text.find(marker)?;
    let rest = &text[idx + marker.len()..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    rest[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_history_query() {
        let text = history_query("dev1", "a.b", 100, 200);
        let parsed = parse_query(&text);
        assert_eq!(Some("dev1".to_owned()), parsed.measurement_literal);
        assert_eq!(Some("a.b".to_owned()), parsed.path_equals);
        assert_eq!(Some(100), parsed.time_from_micros);
        assert_eq!(Some(200), parsed.time_to_micros);
        assert!(!parsed.order_desc);
    }

    #[test]
    fn test_parse_schema_query() {
        let text = schema_query("dev1", 500);
        let parsed = parse_query(&text);
        assert_eq!(Some("dev1__SCHEMAS".to_owned()), parsed.measurement_literal);
        assert_eq!(Some(500), parsed.time_to_micros);
        assert!(parsed.order_desc);
    }

    #[test]
    fn test_parse_bad_data_query() {
        let text = bad_data_query(0, 1000);
        let parsed = parse_query(&text);
        assert_eq!(Some(".*__BAD_DATA".to_owned()), parsed.measurement_suffix_regex);
    }
}
