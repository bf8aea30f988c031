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

//! Value <-> wire encoding.
//!
//! Writing goes through [`crate::value::Value::to_line_protocol_field`]
//! (line-protocol text, with the `i`/`u` integer suffixes InfluxDB's write
//! endpoint expects). Reading goes through this module: a real InfluxDB
//! query reply returns *native* JSON values (no `i`/`u` suffixes -- those
//! only exist on the write side), so [`json_to_value`] decodes a
//! `serde_json::Value` plus the property's declared [`ReferenceType`] back
//! into a [`Value`]. [`line_field_to_json`] exists so the in-memory test
//! backend (`crate::testutils::MemoryBackend`) can honestly simulate that
//! write-then-read shape without a real server.

use crate::value::{ReferenceType, Value};

/// Converts one line-protocol-encoded field (as produced by
/// [`Value::to_line_protocol_field`]) into the native JSON shape a real
/// InfluxDB query reply would contain for that field.
pub fn line_field_to_json(encoded: &str) -> serde_json::Value {
    if let Some(stripped) = encoded.strip_suffix('i').or_else(|| encoded.strip_suffix('u')) {
        if let Ok(n) = stripped.parse::<i64>() {
            return serde_json::json!(n);
        }
    }
    if encoded == "true" || encoded == "false" {
        return serde_json::json!(encoded == "true");
    }
    if let Some(inner) = encoded.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return serde_json::json!(inner.replace("\\\"", "\""));
    }
    if let Ok(f) = encoded.parse::<f64>() {
        return serde_json::json!(f);
    }
    serde_json::json!(encoded)
}

/// Decodes a JSON-native field value back into a typed [`Value`], per the
/// property's declared `reference_type`.
pub fn json_to_value(json: &serde_json::Value, reference_type: ReferenceType) -> Value {
    use ReferenceType::*;
    match reference_type {
        Bool => Value::Bool(json.as_bool().unwrap_or_default()),
        I8 => Value::I8(json.as_i64().unwrap_or_default() as i8),
        U8 => Value::U8(json.as_u64().unwrap_or_default() as u8),
        I16 => Value::I16(json.as_i64().unwrap_or_default() as i16),
        U16 => Value::U16(json.as_u64().unwrap_or_default() as u16),
        I32 => Value::I32(json.as_i64().unwrap_or_default() as i32),
        U32 => Value::U32(json.as_u64().unwrap_or_default() as u32),
        I64 => Value::I64(json.as_i64().unwrap_or_default()),
        U64 => Value::U64(json.as_u64().unwrap_or_default()),
        Float => Value::Float(json.as_f64().unwrap_or_default() as f32),
        Double => Value::Double(json.as_f64().unwrap_or_default()),
        String => Value::String(json.as_str().unwrap_or_default().to_owned()),
        VectorBool => {
            Value::VectorBool(split_canonical(json).into_iter().map(|s| s == "true").collect())
        }
        VectorI8 => Value::VectorI8(parse_each(json)),
        VectorU8 => Value::VectorU8(parse_each(json)),
        VectorI16 => Value::VectorI16(parse_each(json)),
        VectorU16 => Value::VectorU16(parse_each(json)),
        VectorI32 => Value::VectorI32(parse_each(json)),
        VectorU32 => Value::VectorU32(parse_each(json)),
        VectorI64 => Value::VectorI64(parse_each(json)),
        VectorU64 => Value::VectorU64(parse_each(json)),
        VectorFloat => Value::VectorFloat(parse_each(json)),
        VectorDouble => Value::VectorDouble(parse_each(json)),
        VectorString => {
            Value::VectorString(split_canonical(json).into_iter().map(str::to_owned).collect())
        }
        Table => Value::Table(Vec::new()),
    }
}

fn split_canonical(json: &serde_json::Value) -> Vec<&str> {
    let s = json.as_str().unwrap_or_default();
    if s.is_empty() {
        Vec::new()
    } else {
        s.split(',').collect()
    }
}

fn parse_each<T: std::str::FromStr + Default>(json: &serde_json::Value) -> Vec<T> {
    let s = json.as_str().unwrap_or_default();
    if s.is_empty() {
        return Vec::new();
    }
    s.split(',').map(|part| part.parse().unwrap_or_default()).collect()
}
