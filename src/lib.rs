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

//! Time-series data-logging pipeline for a fleet of control devices.
//!
//! Three collaborating services make up the core of this crate:
//!
//! * [`manager`] maintains the stable device-to-logger assignment and
//!   restores it across restarts;
//! * [`logger`] ingests property updates and schema revisions, classifies
//!   bad data, batches writes and enforces rate/size limits;
//! * [`reader`] answers property-history and configuration-at-time queries.
//!
//! All three talk to a time-series store through the [`backend`] module,
//! which knows nothing about devices or schemas -- it only writes and
//! queries line-protocol-shaped data.

pub mod backend;
pub mod config;
pub mod error;
pub mod logger;
pub mod manager;
pub mod reader;
pub mod schema;
pub mod slots;
pub mod timestamp;
pub mod value;

#[cfg(test)]
pub(crate) mod testutils;


pub use config::Config;
pub use error::{BackendError, LoggerError, ManagerError, ReaderError};
pub use logger::DataLogger;
pub use manager::LoggerManager;
pub use reader::LogReader;
