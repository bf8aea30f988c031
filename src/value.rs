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

//! The narrow slice of the typed-value model this crate consumes.
//!
//! The full attribute-tree / typed-value model ("Hash") is an external
//! collaborator; this crate only needs one property's value at a time,
//! tagged with its `ReferenceType`, matched with a `match` over the tag
//! rather than any reflection.

use std::collections::BTreeMap;
use std::fmt;

/// The reference type tag carried alongside every [`Value`]. Kept distinct
/// from `Value` itself so that a [`crate::schema::PropertySchema`] can
/// declare an expected type without holding a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ReferenceType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Float,
    Double,
    String,
    VectorBool,
    VectorI8,
    VectorU8,
    VectorI16,
    VectorU16,
    VectorI32,
    VectorU32,
    VectorI64,
    VectorU64,
    VectorFloat,
    VectorDouble,
    VectorString,
    Table,
}

/// A single row of a [`Value::Table`]: an ordered map from column name to
/// scalar value.
pub type TableRow = BTreeMap<String, Value>;

/// A dynamically-typed property value.
///
/// Scalars and their vector counterparts are distinct variants rather than a
/// single `Vec<Scalar>` so that `reference_type()` is a plain tag lookup, not
/// a secondary dispatch.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Float(f32),
    Double(f64),
    String(String),
    VectorBool(Vec<bool>),
    VectorI8(Vec<i8>),
    VectorU8(Vec<u8>),
    VectorI16(Vec<i16>),
    VectorU16(Vec<u16>),
    VectorI32(Vec<i32>),
    VectorU32(Vec<u32>),
    VectorI64(Vec<i64>),
    VectorU64(Vec<u64>),
    VectorFloat(Vec<f32>),
    VectorDouble(Vec<f64>),
    VectorString(Vec<String>),
    Table(Vec<TableRow>),
}

impl Value {
    pub fn reference_type(&self) -> ReferenceType {
        match self {
            Value::Bool(_) => ReferenceType::Bool,
            Value::I8(_) => ReferenceType::I8,
            Value::U8(_) => ReferenceType::U8,
            Value::I16(_) => ReferenceType::I16,
            Value::U16(_) => ReferenceType::U16,
            Value::I32(_) => ReferenceType::I32,
            Value::U32(_) => ReferenceType::U32,
            Value::I64(_) => ReferenceType::I64,
            Value::U64(_) => ReferenceType::U64,
            Value::Float(_) => ReferenceType::Float,
            Value::Double(_) => ReferenceType::Double,
            Value::String(_) => ReferenceType::String,
            Value::VectorBool(_) => ReferenceType::VectorBool,
            Value::VectorI8(_) => ReferenceType::VectorI8,
            Value::VectorU8(_) => ReferenceType::VectorU8,
            Value::VectorI16(_) => ReferenceType::VectorI16,
            Value::VectorU16(_) => ReferenceType::VectorU16,
            Value::VectorI32(_) => ReferenceType::VectorI32,
            Value::VectorU32(_) => ReferenceType::VectorU32,
            Value::VectorI64(_) => ReferenceType::VectorI64,
            Value::VectorU64(_) => ReferenceType::VectorU64,
            Value::VectorFloat(_) => ReferenceType::VectorFloat,
            Value::VectorDouble(_) => ReferenceType::VectorDouble,
            Value::VectorString(_) => ReferenceType::VectorString,
            Value::Table(_) => ReferenceType::Table,
        }
    }

    /// Number of elements for vector/table values; `1` for scalars
    /// (including strings), used by the vector-size classification check.
    pub fn vector_len(&self) -> Option<usize> {
        match self {
            Value::VectorBool(v) => Some(v.len()),
            Value::VectorI8(v) => Some(v.len()),
            Value::VectorU8(v) => Some(v.len()),
            Value::VectorI16(v) => Some(v.len()),
            Value::VectorU16(v) => Some(v.len()),
            Value::VectorI32(v) => Some(v.len()),
            Value::VectorU32(v) => Some(v.len()),
            Value::VectorI64(v) => Some(v.len()),
            Value::VectorU64(v) => Some(v.len()),
            Value::VectorFloat(v) => Some(v.len()),
            Value::VectorDouble(v) => Some(v.len()),
            Value::VectorString(v) => Some(v.len()),
            Value::Table(rows) => Some(rows.len()),
            _ => None,
        }
    }

    /// Length of a string value, used by the oversize-string classification
    /// check. `None` for non-string values.
    pub fn string_len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.len()),
            _ => None,
        }
    }

    /// Approximate wire cost in bytes, used for rate-limit accounting and
    /// batch byte-threshold flushing.
    pub fn byte_cost(&self) -> u64 {
        match self {
            Value::Bool(_) => 1,
            Value::I8(_) | Value::U8(_) => 1,
            Value::I16(_) | Value::U16(_) => 2,
            Value::I32(_) | Value::U32(_) | Value::Float(_) => 4,
            Value::I64(_) | Value::U64(_) | Value::Double(_) => 8,
            Value::String(s) => s.len() as u64,
            Value::VectorBool(v) => v.len() as u64,
            Value::VectorI8(v) => v.len() as u64,
            Value::VectorU8(v) => v.len() as u64,
            Value::VectorI16(v) => v.len() as u64 * 2,
            Value::VectorU16(v) => v.len() as u64 * 2,
            Value::VectorI32(v) => v.len() as u64 * 4,
            Value::VectorU32(v) => v.len() as u64 * 4,
            Value::VectorFloat(v) => v.len() as u64 * 4,
            Value::VectorI64(v) => v.len() as u64 * 8,
            Value::VectorU64(v) => v.len() as u64 * 8,
            Value::VectorDouble(v) => v.len() as u64 * 8,
            Value::VectorString(v) => v.iter().map(|s| s.len() as u64).sum(),
            Value::Table(rows) => {
                rows.iter().flat_map(|r| r.values()).map(Value::byte_cost).sum()
            }
        }
    }

    /// Renders this value as a single line-protocol field value: float keeps
    /// 7 significant decimal digits, double keeps 15, without rounding
    /// non-displayed bits; strings are quoted.
    pub fn to_line_protocol_field(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::I8(v) => format!("{v}i"),
            Value::U8(v) => format!("{v}u"),
            Value::I16(v) => format!("{v}i"),
            Value::U16(v) => format!("{v}u"),
            Value::I32(v) => format!("{v}i"),
            Value::U32(v) => format!("{v}u"),
            Value::I64(v) => format!("{v}i"),
            Value::U64(v) => format!("{v}u"),
            Value::Float(v) => format!("{:.7e}", v),
            Value::Double(v) => format!("{:.15e}", v),
            Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
            other => format!("\"{}\"", other.to_canonical_string()),
        }
    }

    /// A deterministic canonical textual form, used when a value needs to be
    /// embedded as an opaque string (vectors, tables) and for schema
    /// digesting of default values.
    pub fn to_canonical_string(&self) -> String {
        match self {
            Value::VectorString(v) => v.join(","),
            Value::VectorBool(v) => v.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(","),
            Value::VectorI32(v) => v.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(","),
            Value::VectorI64(v) => v.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(","),
            Value::VectorDouble(v) => v.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(","),
            Value::Table(rows) => format!("{rows:?}"),
            other => format!("{other:?}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}
