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

//! Error types for the data-logging pipeline.
//!
//! Internal-only plumbing (the backend transport) gets a string-carrying
//! error: cheap to build, never seen outside the process. The three public
//! services cross a client-facing RPC boundary, so each gets a
//! `thiserror`-derived enum whose `Display` text matches the exact phrases
//! external clients grep for.

use std::fmt;

/// Errors returned by the [`crate::backend`] transport layer.
///
/// This is purely-internal plumbing, not a client-facing surface, so a
/// string-carrying variant is enough.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request to backend timed out")]
    Timeout,

    #[error("backend http error: {0}")]
    Http(String),

    #[error("failed to parse backend reply: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Parse(e.to_string())
    }
}

/// Errors surfaced by the [`crate::manager::LoggerManager`].
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The persisted logger map refers to a server that the current
    /// `serverList` no longer declares.
    ///
    /// The message MUST contain the exact phrase external tests match on.
    #[error(
        "Inconsistent 'loggermap.xml' and 'serverList' configuration: \
         '{server}' is in map, but not in list."
    )]
    InconsistentMap { server: String },

    #[error("failed to persist logger map: {0}")]
    Persistence(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors surfaced by the [`crate::logger::DataLogger`].
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("backend unreachable after exhausting retry budget: {0}")]
    UnreachableBackend(String),

    #[error("flush timed out waiting for acknowledgement")]
    FlushTimeout,

    #[error("logger is in ERROR state and must be restarted")]
    NotRunning,
}

/// Errors surfaced by the [`crate::reader::LogReader`].
///
/// [`crate::slots`] is the only place that should format one of these into
/// wire-level RPC text.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// `maxNumData` was outside `[0, maxHistorySize]`.
    ///
    /// Message deliberately contains both phrases external tests grep for:
    /// `"Requested maximum number of data points ('maxNumData') is"` and
    /// `"which surpasses the limit of"`.
    #[error(
        "Requested maximum number of data points ('maxNumData') is {requested}, \
         which surpasses the limit of {limit}."
    )]
    MaxNumDataOutOfRange { requested: u64, limit: u64 },

    /// No schema revision exists at or before the requested timepoint.
    ///
    /// Two historical phrasings existed for this condition (one from a
    /// file-backed code path, one from a time-series-backed one); this emits
    /// one canonical phrase but [`ReaderError::matches_legacy`] recognizes
    /// the other so older client-side string matches keep working.
    #[error("No active schema could be found for device at (or before) timepoint.")]
    NoSchemaBeforeTime,

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl ReaderError {
    /// Returns true if `text` matches either of the two historical
    /// "no schema before time" phrasings tolerated by legacy clients.
    pub fn matches_legacy(text: &str) -> bool {
        text.contains("No active schema could be found for device at (or before) timepoint.")
            || text.contains("no schema found for device before requested time")
    }
}

/// A `RemoteException`-shaped error for RPC compatibility, constructed only
/// at the [`crate::slots`] boundary. The core never builds one of these
/// directly -- it is purely a translation artifact for remote callers.
#[derive(Debug)]
pub struct RemoteException {
    pub message: String,
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RemoteException {}

impl From<ReaderError> for RemoteException {
    fn from(e: ReaderError) -> Self {
        RemoteException { message: e.to_string() }
    }
}

impl From<ManagerError> for RemoteException {
    fn from(e: ManagerError) -> Self {
        RemoteException { message: e.to_string() }
    }
}
