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

//! Configuration surface recognized by the pipeline, plus the
//! environment-variable fallbacks consulted at startup.
//!
//! A misconfigured or absent environment variable falls back to a sensible
//! default and logs a warning; it never panics the process.

use std::env;
use std::time::Duration;

/// Backend connection parameters: the four URL/user/password pairs plus the
/// target database name.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BackendConfig {
    pub url_write: String,
    pub user_write: String,
    pub password_write: String,
    pub url_read: String,
    pub user_read: String,
    pub password_read: String,
    pub dbname: String,
}

impl BackendConfig {
    /// Builds a [`BackendConfig`] from the `KARABO_INFLUXDB_*` environment
    /// variables, falling back to `KARABO_BROKER_TOPIC` for the database
    /// name and `KARABO_TEST_INFLUXDB_HOST` to derive test endpoints.
    pub fn from_env() -> Self {
        let write_url = env_or_warn("KARABO_INFLUXDB_WRITE_URL", "http://localhost:8086");
        let query_url = env_or_warn("KARABO_INFLUXDB_QUERY_URL", "http://localhost:8086");
        let write_user = env_or_warn("KARABO_INFLUXDB_WRITE_USER", "");
        let write_password = env_or_warn("KARABO_INFLUXDB_WRITE_PASSWORD", "");
        let query_user = env_or_warn("KARABO_INFLUXDB_QUERY_USER", "");
        let query_password = env_or_warn("KARABO_INFLUXDB_QUERY_PASSWORD", "");

        let dbname = match env::var("KARABO_INFLUXDB_DBNAME") {
            Ok(v) if !v.is_empty() => v,
            _ => env_or_warn("KARABO_BROKER_TOPIC", "karabo"),
        };

        let (write_url, query_url) = match env::var("KARABO_TEST_INFLUXDB_HOST") {
            Ok(host) if !host.is_empty() => {
                (format!("http://{host}:8086"), format!("http://{host}:8086"))
            }
            _ => (write_url, query_url),
        };

        Self {
            url_write: write_url,
            user_write: write_user,
            password_write: write_password,
            url_read: query_url,
            user_read: query_user,
            password_read: query_password,
            dbname,
        }
    }
}

/// Rate-limiting parameters for one sliding window.
///
/// `rate_bytes_per_sec` is the configured `maxPerDevicePropLogRate` /
/// `maxSchemaLogRate` value (named a *rate*, in kB) reinterpreted as kB
/// **per second**; the per-window byte budget `B` that admission is tested
/// against is then `rate_bytes_per_sec * period`. See `DESIGN.md` for the
/// full resolution of this naming ambiguity.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RateLimit {
    /// Rate in bytes per second.
    pub rate_bytes_per_sec: u64,
    /// Window length.
    pub period: Duration,
}

impl RateLimit {
    /// The effective byte budget `B` for the whole window, per the
    /// resolution documented on this struct.
    pub fn window_budget_bytes(&self) -> u64 {
        self.rate_bytes_per_sec * self.period.as_secs().max(1)
    }
}

/// Full configuration of the data-logging pipeline.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub flush_interval: Duration,
    pub server_list: Vec<String>,
    pub backend: BackendConfig,

    pub max_vector_size: usize,
    pub max_value_string_size: usize,

    pub prop_log_rate: RateLimit,
    pub schema_log_rate: RateLimit,

    /// Minimum gap between re-writes of an identical schema digest.
    pub safe_schema_retention_period: Duration,

    /// Tolerance beyond which an event's stamp is classified as
    /// "far-future"; 120s by default.
    pub far_future_tolerance: Duration,

    /// Larger skew threshold past which the logger's rate-accounting
    /// reference sticks to wall-time instead of event-time. This was
    /// hard-coded previously; it is exposed here as configuration, with the
    /// chosen semantics documented in `DESIGN.md`.
    pub far_future_wall_time_switch_threshold: Duration,

    /// Upper bound accepted for `maxNumData` in `slotGetPropertyHistory`.
    pub max_history_size: u64,

    pub flush_timeout: Duration,

    pub backend_max_in_flight_requests: usize,
    pub backend_request_timeout: Duration,
    pub backend_write_retry_budget: usize,
}

impl Config {
    /// A configuration with conservative defaults: 1s flush interval, 120s
    /// far-future tolerance, ~2 year safe schema retention.
    pub fn with_defaults(server_list: Vec<String>, backend: BackendConfig) -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
            server_list,
            backend,
            max_vector_size: 1_000_000,
            max_value_string_size: 8192,
            prop_log_rate: RateLimit {
                rate_bytes_per_sec: 1024 * 1024,
                period: Duration::from_secs(5),
            },
            schema_log_rate: RateLimit {
                rate_bytes_per_sec: 1024 * 1024,
                period: Duration::from_secs(5),
            },
            safe_schema_retention_period: Duration::from_secs(2 * 365 * 24 * 3600),
            far_future_tolerance: Duration::from_secs(120),
            far_future_wall_time_switch_threshold: Duration::from_secs(600),
            max_history_size: 10_000,
            flush_timeout: Duration::from_secs(10),
            backend_max_in_flight_requests: 32,
            backend_request_timeout: Duration::from_secs(10),
            backend_write_retry_budget: 1,
        }
    }

    /// Converts a `safeSchemaRetentionPeriod` expressed in (fractional)
    /// years into a `Duration`. A sub-second value expressed "in years"
    /// must not truncate to zero, so this uses floating point seconds
    /// rather than integer years.
    pub fn retention_period_from_years(years: f64) -> Duration {
        const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;
        Duration::from_secs_f64((years * SECONDS_PER_YEAR).max(0.0))
    }
}

/// Reads `name` from the environment, logging a warning and returning
/// `default` if it is absent or not valid UTF-8.
fn env_or_warn(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(v) => v,
        Err(env::VarError::NotPresent) => default.to_owned(),
        Err(e) => {
            log::warn!("Invalid value for environment variable {name}: {e}");
            default.to_owned()
        }
    }
}
