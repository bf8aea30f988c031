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

//! The Data Logger: the write path.
//!
//! A single background task owns all mutable state and is fed through an
//! mpsc channel of `Action`s; the public API is a cheap, `Clone`-able handle
//! that sends actions and awaits their `oneshot` reply.

pub mod bad_data;
pub mod classify;
pub mod rate_limit;
pub mod schema_cache;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::backend::{BackendClient, LineRecord};
use crate::config::Config;
use crate::error::LoggerError;
use crate::schema::DeviceSchema;
use crate::timestamp::Timestamp;

use bad_data::{BadDataRecord, BadDataRing, ReasonCode};
use classify::{classify_size_and_time, PropertyEvent, SizeTimeClassification};
use rate_limit::RateWindow;
use schema_cache::SchemaDigestCache;

const BAD_DATA_RING_CAPACITY: usize = 10_000;
const SCHEMA_KEY: &str = "::schema";

/// Sentinel property path recording that a device was tagged discontinued,
/// used by [`crate::reader`] to compute `configAtTimeFlag`: true only when
/// no "device gone" event falls between the latest observed value and
/// `atTime`.
pub const DEVICE_GONE_PATH: &str = "__device_gone__";

/// Data Logger state machine: `Init -> On -> {On, Error}`. `Error` is
/// terminal: recovery requires an explicit restart, i.e. constructing a
/// fresh [`DataLogger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerState {
    Init,
    On,
    Error,
}

/// A schema revision as received from the messaging layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRevision {
    pub device_id: String,
    pub schema: DeviceSchema,
    pub first_seen_at: Timestamp,
}

/// A read-only, point-in-time view of the logger's observable properties:
/// `devicesToBeLogged`, `devicesNotLogged`, `lastUpdatesUtc`, `state`,
/// `status`.
#[derive(Debug, Clone)]
pub struct LoggerSnapshot {
    pub devices_to_be_logged: HashSet<String>,
    pub devices_not_logged: HashSet<String>,
    pub last_updates_utc: HashMap<String, Timestamp>,
    pub state: LoggerState,
    pub status: String,
}

impl Default for LoggerSnapshot {
    fn default() -> Self {
        Self {
            devices_to_be_logged: HashSet::new(),
            devices_not_logged: HashSet::new(),
            last_updates_utc: HashMap::new(),
            state: LoggerState::Init,
            status: "initializing".to_owned(),
        }
    }
}

#[derive(Debug)]
enum LoggerAction {
    Stop,
    Flush { ack: oneshot::Sender<Result<(), LoggerError>> },
    PropertyUpdate(PropertyEvent),
    SchemaUpdate(SchemaRevision),
    TagDiscontinued { device_id: String, reason: String },
    AddDevices(Vec<String>),
}

/// Public, cheaply-`Clone`-able handle to a running Data Logger instance.
///
/// The backing task is kept alive by the `JoinHandle` held alongside it
/// (dropped together), and every public operation goes through the action
/// channel.
#[derive(Clone)]
pub struct DataLogger {
    action_tx: mpsc::Sender<LoggerAction>,
    snapshot_rx: watch::Receiver<LoggerSnapshot>,
}

impl DataLogger {
    /// Spawns a new Data Logger loop task, returning a handle to it and the
    /// task's `JoinHandle` (dropping the handle does not stop the task --
    /// callers that want a clean shutdown should call
    /// [`DataLogger::stop`]).
    pub fn spawn(config: Config, backend: BackendClient) -> (Self, JoinHandle<()>) {
        let (action_tx, action_rx) = mpsc::channel(1024);
        let (snapshot_tx, snapshot_rx) = watch::channel(LoggerSnapshot::default());

        let join = tokio::spawn(run_loop(config, backend, action_rx, snapshot_tx));

        (Self { action_tx, snapshot_rx }, join)
    }

    /// Blocks until all events sent prior to this call have been durably
    /// acknowledged by the backend, or fails with a timeout. Observable
    /// externally; callers rely on this as a barrier.
    pub async fn flush(&self, timeout: Duration) -> Result<(), LoggerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.action_tx
            .send(LoggerAction::Flush { ack: ack_tx })
            .await
            .map_err(|_| LoggerError::NotRunning)?;
        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LoggerError::NotRunning),
            Err(_) => Err(LoggerError::FlushTimeout),
        }
    }

    pub async fn submit_property_update(&self, event: PropertyEvent) {
        let _ = self.action_tx.send(LoggerAction::PropertyUpdate(event)).await;
    }

    pub async fn submit_schema_update(&self, revision: SchemaRevision) {
        let _ = self.action_tx.send(LoggerAction::SchemaUpdate(revision)).await;
    }

    /// Removes `device_id` from the active set; the next update received
    /// from it is ignored.
    pub async fn slot_tag_device_to_be_discontinued(&self, reason: String, device_id: String) {
        let _ = self
            .action_tx
            .send(LoggerAction::TagDiscontinued { device_id, reason })
            .await;
    }

    pub async fn slot_add_devices_to_be_logged(&self, ids: Vec<String>) {
        let _ = self.action_tx.send(LoggerAction::AddDevices(ids)).await;
    }

    pub async fn stop(&self) {
        let _ = self.action_tx.send(LoggerAction::Stop).await;
    }

    pub fn snapshot(&self) -> LoggerSnapshot {
        self.snapshot_rx.borrow().clone()
    }
}

/// Per-device-property write cost accounting key: either a concrete
/// property path, or the sentinel [`SCHEMA_KEY`] for schema-revision rate
/// accounting.
type RateKey = (String, String);

struct LoopState {
    config: Config,
    backend: BackendClient,

    devices_to_be_logged: HashSet<String>,
    devices_not_logged: HashSet<String>,
    last_updates_utc: HashMap<String, Timestamp>,
    state: LoggerState,
    status: String,

    rate_windows: HashMap<RateKey, RateWindow>,
    digest_cache: SchemaDigestCache,
    bad_data_ring: BadDataRing,

    /// Sticky latch: once skew has exceeded
    /// `far_future_wall_time_switch_threshold` this logger instance's rate
    /// accounting uses wall-time as its reference for good.
    wall_time_reference: bool,

    pending_values: HashMap<String, Vec<LineRecord>>,
    pending_schemas: HashMap<String, Vec<LineRecord>>,
    pending_bad_data: HashMap<String, Vec<LineRecord>>,
    pending_bytes: u64,

    /// Set when a flush's backend write failed once; retried on the next
    /// flush attempt before anything else is written.
    retry_batch: Option<PendingBatch>,
}

#[derive(Clone)]
struct PendingBatch {
    values: HashMap<String, Vec<LineRecord>>,
    schemas: HashMap<String, Vec<LineRecord>>,
    bad_data: HashMap<String, Vec<LineRecord>>,
}

async fn run_loop(
    config: Config,
    backend: BackendClient,
    mut action_rx: mpsc::Receiver<LoggerAction>,
    snapshot_tx: watch::Sender<LoggerSnapshot>,
) {
    let flush_interval = config.flush_interval;
    let byte_threshold = config.max_value_string_size as u64 * 64;

    let mut state = LoopState {
        config,
        backend,
        devices_to_be_logged: HashSet::new(),
        devices_not_logged: HashSet::new(),
        last_updates_utc: HashMap::new(),
        state: LoggerState::On,
        status: "ON".to_owned(),
        rate_windows: HashMap::new(),
        digest_cache: SchemaDigestCache::new(),
        bad_data_ring: BadDataRing::new(BAD_DATA_RING_CAPACITY),
        wall_time_reference: false,
        pending_values: HashMap::new(),
        pending_schemas: HashMap::new(),
        pending_bad_data: HashMap::new(),
        pending_bytes: 0,
        retry_batch: None,
    };
    log::info!("Data Logger loop starting, flush interval {flush_interval:?}");
    publish_snapshot(&state, &snapshot_tx);

    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = do_flush(&mut state).await;
                publish_snapshot(&state, &snapshot_tx);
            }
            action = action_rx.recv() => {
                match action {
                    None => break,
                    Some(LoggerAction::Stop) => {
                        let _ = do_flush(&mut state).await;
                        break;
                    }
                    Some(LoggerAction::Flush { ack }) => {
                        let result = do_flush(&mut state).await;
                        publish_snapshot(&state, &snapshot_tx);
                        let _ = ack.send(result);
                    }
                    Some(LoggerAction::PropertyUpdate(event)) => {
                        handle_property_update(&mut state, event, byte_threshold).await;
                        publish_snapshot(&state, &snapshot_tx);
                    }
                    Some(LoggerAction::SchemaUpdate(revision)) => {
                        handle_schema_update(&mut state, revision, byte_threshold).await;
                        publish_snapshot(&state, &snapshot_tx);
                    }
                    Some(LoggerAction::TagDiscontinued { device_id, reason }) => {
                        log::info!("Device '{device_id}' tagged discontinued: {reason}");
                        mark_device_gone(&mut state, &device_id);
                        state.digest_cache.release_device(&device_id);
                        state.devices_to_be_logged.remove(&device_id);
                        state.devices_not_logged.insert(device_id);
                        publish_snapshot(&state, &snapshot_tx);
                    }
                    Some(LoggerAction::AddDevices(ids)) => {
                        log::debug!("Adding {} device(s) to be logged", ids.len());
                        for id in ids {
                            state.devices_to_be_logged.insert(id);
                        }
                        publish_snapshot(&state, &snapshot_tx);
                    }
                }
            }
        }
    }
}

fn publish_snapshot(state: &LoopState, snapshot_tx: &watch::Sender<LoggerSnapshot>) {
    let _ = snapshot_tx.send(LoggerSnapshot {
        devices_to_be_logged: state.devices_to_be_logged.clone(),
        devices_not_logged: state.devices_not_logged.clone(),
        last_updates_utc: state.last_updates_utc.clone(),
        state: state.state,
        status: state.status.clone(),
    });
}

async fn handle_property_update(state: &mut LoopState, event: PropertyEvent, byte_threshold: u64) {
    if state.devices_not_logged.contains(&event.device_id) {
        // Device was tagged discontinued: ignore its next update entirely.
        return;
    }
    state.devices_to_be_logged.insert(event.device_id.clone());

    let now = Timestamp::now();
    let classification = classify_size_and_time(&state.config, now, event);

    let (event, extra_bad_data) = match classification {
        SizeTimeClassification::Good(event) => (Some(event), None),
        SizeTimeClassification::RetimedGood { event, bad_data } => (Some(event), Some(bad_data)),
        SizeTimeClassification::Bad(bad_data) => (None, Some(bad_data)),
    };

    if let Some(bad_data) = extra_bad_data {
        log::warn!(
            "Bad data for device '{}': {:?} ({})",
            bad_data.device_id,
            bad_data.reason_code,
            bad_data.info
        );
        push_bad_data(state, bad_data);
    }

    let Some(event) = event else { return };

    let rate_key = (event.device_id.clone(), event.path.clone());
    let cost = event.value.byte_cost();
    let window = state.rate_windows.entry(rate_key).or_default();
    let admitted = window.try_admit(
        now,
        state.config.prop_log_rate.period,
        state.config.prop_log_rate.window_budget_bytes(),
        cost,
    );
    if !admitted {
        log::debug!("Rate-limited property update for '{}' '{}'", event.device_id, event.path);
        push_bad_data(
            state,
            BadDataRecord::rate_limited(event.device_id.clone(), now, &event.path),
        );
        return;
    }

    let line = LineRecord {
        measurement: event.device_id.clone(),
        tags: vec![("path".to_owned(), event.path.clone())],
        fields: vec![("value".to_owned(), event.value.to_line_protocol_field())],
        timestamp_micros: event.stamp.to_micros(),
    };
    state.pending_bytes += cost;
    state.pending_values.entry(event.device_id.clone()).or_default().push(line);
    state.last_updates_utc.insert(event.device_id, event.stamp);

    if state.pending_bytes >= byte_threshold {
        let _ = do_flush(state).await;
    }
}

async fn handle_schema_update(state: &mut LoopState, revision: SchemaRevision, byte_threshold: u64) {
    let now = Timestamp::now();
    let digest = revision.schema.digest();
    // The wire blob is a JSON rendering of the schema (easy for the Reader
    // to reconstitute); the digest above is computed from the canonical
    // text form instead, since the two serve different purposes -- the
    // digest only needs to be stable under re-serialization, not
    // human/wire-shaped.
    let blob = serde_json::to_string(&revision.schema).expect("DeviceSchema always serializes");
    let cost = blob.len() as u64;

    let window = state
        .rate_windows
        .entry((revision.device_id.clone(), SCHEMA_KEY.to_owned()))
        .or_default();
    let admitted = window.try_admit(
        now,
        state.config.schema_log_rate.period,
        state.config.schema_log_rate.window_budget_bytes(),
        cost,
    );
    if !admitted {
        push_bad_data(
            state,
            BadDataRecord {
                device_id: revision.device_id.clone(),
                time: now,
                info: format!("{}::schema", revision.device_id),
                reason_code: ReasonCode::SchemaRateLimited,
            },
        );
        return;
    }

    if !state.digest_cache.should_write(
        &revision.device_id,
        &digest,
        revision.first_seen_at,
        state.config.safe_schema_retention_period,
    ) {
        return;
    }
    state.digest_cache.record_write(&revision.device_id, &digest, revision.first_seen_at);

    let chunks = chunk_schema_blob(&blob, state.config.max_value_string_size);
    let mut lines = Vec::with_capacity(chunks.len());
    for (idx, chunk) in chunks.iter().enumerate() {
        lines.push(LineRecord {
            measurement: format!("{}__SCHEMAS", revision.device_id),
            tags: vec![("digest".to_owned(), digest.clone())],
            fields: vec![
                ("chunk_index".to_owned(), format!("{idx}i")),
                ("size".to_owned(), format!("{}i", blob.len())),
                ("blob".to_owned(), format!("\"{}\"", chunk.replace('"', "\\\""))),
            ],
            timestamp_micros: revision.first_seen_at.to_micros(),
        });
    }

    state
        .pending_schemas
        .entry(revision.device_id.clone())
        .or_default()
        .extend(lines);

    if state.pending_bytes + cost >= byte_threshold {
        let _ = do_flush(state).await;
    }
}

/// Splits `blob` into adjacent records sharing the same digest and ordered
/// chunk index when it is larger than `max_len`.
fn chunk_schema_blob(blob: &str, max_len: usize) -> Vec<&str> {
    if blob.len() <= max_len || max_len == 0 {
        return vec![blob];
    }
    let mut chunks = Vec::new();
    let mut rest = blob;
    while !rest.is_empty() {
        let mut boundary = max_len.min(rest.len());
        while boundary > 0 && !rest.is_char_boundary(boundary) {
            boundary -= 1;
        }
        if boundary == 0 {
            boundary = rest.len();
        }
        let (chunk, remainder) = rest.split_at(boundary);
        chunks.push(chunk);
        rest = remainder;
    }
    chunks
}

fn mark_device_gone(state: &mut LoopState, device_id: &str) {
    let now = Timestamp::now();
    let line = LineRecord {
        measurement: device_id.to_owned(),
        tags: vec![("path".to_owned(), DEVICE_GONE_PATH.to_owned())],
        fields: vec![("value".to_owned(), "true".to_owned())],
        timestamp_micros: now.to_micros(),
    };
    state.pending_values.entry(device_id.to_owned()).or_default().push(line);
}

fn push_bad_data(state: &mut LoopState, record: BadDataRecord) {
    let line = LineRecord {
        measurement: format!("{}__BAD_DATA", record.device_id),
        tags: vec![("reason".to_owned(), format!("{:?}", record.reason_code))],
        fields: vec![("info".to_owned(), format!("\"{}\"", record.info.replace('"', "\\\"")))],
        timestamp_micros: record.time.to_micros(),
    };
    state.pending_bad_data.entry(record.device_id.clone()).or_default().push(line);
    state.bad_data_ring.push(record);
}

/// Flushes all pending batches, retrying a previously-failed batch first.
/// On a second consecutive failure the logger transitions to
/// [`LoggerState::Error`].
async fn do_flush(state: &mut LoopState) -> Result<(), LoggerError> {
    let mut batch = PendingBatch {
        values: std::mem::take(&mut state.pending_values),
        schemas: std::mem::take(&mut state.pending_schemas),
        bad_data: std::mem::take(&mut state.pending_bad_data),
    };
    state.pending_bytes = 0;

    if let Some(retry) = state.retry_batch.take() {
        merge_batch(&mut batch, retry);
    }

    if batch.values.is_empty() && batch.schemas.is_empty() && batch.bad_data.is_empty() {
        return Ok(());
    }

    match write_batch(&state.backend, &batch).await {
        Ok(()) => {
            state.state = LoggerState::On;
            state.status = "ON".to_owned();
            Ok(())
        }
        Err(e) => {
            if state.retry_batch.is_none() {
                log::warn!("Backend write failed, will retry once: {e}");
                state.retry_batch = Some(batch);
                Ok(())
            } else {
                log::error!("Backend write failed on retry, entering ERROR state: {e}");
                eprintln!("Failed to write log entries: {e}");
                state.state = LoggerState::Error;
                state.status = format!("ERROR: {e}");
                Err(LoggerError::UnreachableBackend(e.to_string()))
            }
        }
    }
}

fn merge_batch(into: &mut PendingBatch, from: PendingBatch) {
    for (device, mut lines) in from.values {
        let entry = into.values.entry(device).or_default();
        lines.append(entry);
        *entry = lines;
    }
    for (device, mut lines) in from.schemas {
        let entry = into.schemas.entry(device).or_default();
        lines.append(entry);
        *entry = lines;
    }
    for (device, mut lines) in from.bad_data {
        let entry = into.bad_data.entry(device).or_default();
        lines.append(entry);
        *entry = lines;
    }
}

async fn write_batch(
    backend: &BackendClient,
    batch: &PendingBatch,
) -> Result<(), crate::error::BackendError> {
    for (device, lines) in &batch.values {
        backend.write_batch(device, lines.clone()).await?;
    }
    for (device, lines) in &batch.schemas {
        backend.write_batch(&format!("{device}__SCHEMAS"), lines.clone()).await?;
    }
    for (device, lines) in &batch.bad_data {
        backend.write_batch(&format!("{device}__BAD_DATA"), lines.clone()).await?;
    }
    Ok(())
}
