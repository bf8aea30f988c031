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

//! The Logger Manager: device-to-logger assignment.
//!
//! A cheap, cloneable public handle wraps the mutable state it owns -- the
//! persisted [`loggermap::LoggerMap`] plus the round-robin assignment
//! cursor -- guarded by a `tokio::sync::Mutex` since every operation already
//! awaits disk I/O.

pub mod loggermap;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::backend::{Backend, BackendClient};
use crate::config::Config;
use crate::error::ManagerError;
use crate::logger::DataLogger;
use loggermap::{LoggerMap, LoggerMapEntry};

/// Logger Manager state machine: inconsistency
/// between the persisted map and the configured server list is fatal for
/// the component, not the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Init,
    On,
    Error,
}

struct Inner {
    path: PathBuf,
    map: LoggerMap,
    server_list: Vec<String>,
    next_server: usize,
    discontinued: HashSet<String>,
    state: ManagerState,
    status: String,
    /// One running [`DataLogger`] per logger server, keyed by server name.
    /// Spawned in [`LoggerManager::start`], so assignment and the
    /// write path share the same instances the persisted map refers to.
    loggers: HashMap<String, DataLogger>,
}

/// Public, cheaply-`Clone`-able handle to the Logger Manager.
#[derive(Clone)]
pub struct LoggerManager {
    inner: Arc<Mutex<Inner>>,
}

impl LoggerManager {
    /// Creates a manager that will persist its map at `loggermap_path`. Call
    /// [`LoggerManager::start`] before using it for assignment.
    pub fn new(loggermap_path: PathBuf) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                path: loggermap_path,
                map: LoggerMap::default(),
                server_list: Vec::new(),
                next_server: 0,
                discontinued: HashSet::new(),
                state: ManagerState::Init,
                status: "initializing".to_owned(),
                loggers: HashMap::new(),
            })),
        }
    }

    /// Loads the persisted map and checks it against `config.server_list`:
    /// every server referenced by the map must be declared in the config, or
    /// the manager enters [`ManagerState::Error`]. On success, spawns one
    /// [`DataLogger`] per configured server against `backend`, so that
    /// subsequent assignment and discontinuation calls reach a live logger
    /// instance rather than just updating persisted bookkeeping.
    pub async fn start(&self, config: Config, backend: Arc<dyn Backend>) -> Result<(), ManagerError> {
        let mut inner = self.inner.lock().await;
        let map = LoggerMap::load(&inner.path).await?;

        for server in map.referenced_servers() {
            if !config.server_list.iter().any(|s| s == server) {
                let server = server.to_owned();
                inner.state = ManagerState::Error;
                inner.status = format!(
                    "Inconsistent 'loggermap.xml' and 'serverList' configuration: \
                     '{server}' is in map, but not in list."
                );
                log::error!("{}", inner.status);
                return Err(ManagerError::InconsistentMap { server });
            }
        }

        let mut loggers = HashMap::with_capacity(config.server_list.len());
        for server in &config.server_list {
            let client = BackendClient::new(
                backend.clone(),
                config.backend_max_in_flight_requests,
                config.backend_request_timeout,
            );
            let (data_logger, _join) = DataLogger::spawn(config.clone(), client);
            loggers.insert(server.clone(), data_logger);
        }

        inner.map = map;
        inner.server_list = config.server_list.clone();
        inner.next_server = 0;
        inner.loggers = loggers;
        inner.state = ManagerState::On;
        inner.status = "ON".to_owned();
        log::info!("Logger Manager started with {} server(s)", inner.server_list.len());
        Ok(())
    }

    /// Returns the [`DataLogger`] instance currently owning `device_id`, if
    /// the device has been assigned to one.
    pub async fn logger_for_device(&self, device_id: &str) -> Option<DataLogger> {
        let inner = self.inner.lock().await;
        let server = inner.map.entry_for(device_id)?.logger_server.clone();
        inner.loggers.get(&server).cloned()
    }

    pub async fn state(&self) -> ManagerState {
        self.inner.lock().await.state
    }

    pub async fn status(&self) -> String {
        self.inner.lock().await.status.clone()
    }

    /// `loggerMap()`: every `{device, dataLogger}` row currently assigned.
    pub async fn logger_map(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock().await;
        inner.map.entries.iter().map(|e| (e.device.clone(), e.data_logger.clone())).collect()
    }

    /// `addDevicesToBeLogged(ids)`: assigns each device not already in the
    /// map to a live server round-robin, and persists the result.
    /// Idempotent: a device already present is left untouched -- assignment
    /// only ever extends, it never re-homes a device silently.
    pub async fn add_devices_to_be_logged(&self, ids: Vec<String>) -> Result<(), ManagerError> {
        let mut inner = self.inner.lock().await;
        if inner.server_list.is_empty() {
            return Err(ManagerError::Persistence("manager has no configured servers".to_owned()));
        }

        let mut changed = false;
        let mut newly_assigned = Vec::new();
        for device in ids {
            if inner.map.contains_device(&device) {
                continue;
            }
            let server = inner.server_list[inner.next_server % inner.server_list.len()].clone();
            inner.next_server = inner.next_server.wrapping_add(1);
            let data_logger = format!("DataLogger-{server}");
            log::info!("Assigning device '{device}' to '{data_logger}' on '{server}'");
            inner.map.entries.push(LoggerMapEntry {
                device: device.clone(),
                data_logger,
                logger_server: server.clone(),
            });
            newly_assigned.push((server, device));
            changed = true;
        }

        if changed {
            let path = inner.path.clone();
            inner.map.save(&path).await?;
        }

        for (server, device) in newly_assigned {
            if let Some(logger) = inner.loggers.get(&server) {
                logger.slot_add_devices_to_be_logged(vec![device]).await;
            }
        }
        Ok(())
    }

    /// `tagDeviceToBeDiscontinued(reason, deviceId)`: idempotent; marks the
    /// device so the next topology pass does not re-offer it for logging,
    /// and forwards the tag to the device's owning [`DataLogger`] so its
    /// write path stops accepting updates from it too.
    pub async fn tag_device_to_be_discontinued(&self, reason: String, device_id: String) {
        let mut inner = self.inner.lock().await;
        inner.discontinued.insert(device_id.clone());

        let server = inner.map.entry_for(&device_id).map(|e| e.logger_server.clone());
        let logger = server.and_then(|server| inner.loggers.get(&server).cloned());
        drop(inner);
        if let Some(logger) = logger {
            logger.slot_tag_device_to_be_discontinued(reason, device_id).await;
        }
    }

    pub async fn is_discontinued(&self, device_id: &str) -> bool {
        self.inner.lock().await.discontinued.contains(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::testutils::MemoryBackend;
    use std::time::Duration;

    fn test_config(server_list: Vec<String>) -> Config {
        Config::with_defaults(
            server_list,
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

    fn memory_backend() -> Arc<dyn Backend> {
        Arc::new(MemoryBackend::new())
    }

    #[tokio::test]
    async fn test_fresh_start_assigns_round_robin() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LoggerManager::new(dir.path().join("loggermap.xml"));
        manager
            .start(test_config(vec!["server1".to_owned(), "server2".to_owned()]), memory_backend())
            .await
            .unwrap();

        manager
            .add_devices_to_be_logged(vec!["dev1".to_owned(), "dev2".to_owned(), "dev3".to_owned()])
            .await
            .unwrap();

        let map = manager.logger_map().await;
        assert_eq!(3, map.len());
        assert_eq!(ManagerState::On, manager.state().await);
        assert!(manager.logger_for_device("dev1").await.is_some());
    }

    #[tokio::test]
    async fn test_add_devices_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LoggerManager::new(dir.path().join("loggermap.xml"));
        manager.start(test_config(vec!["server1".to_owned()]), memory_backend()).await.unwrap();

        manager.add_devices_to_be_logged(vec!["dev1".to_owned()]).await.unwrap();
        manager.add_devices_to_be_logged(vec!["dev1".to_owned()]).await.unwrap();

        assert_eq!(1, manager.logger_map().await.len());
    }

    #[tokio::test]
    async fn test_restart_extends_existing_map_without_rehoming() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loggermap.xml");

        let first = LoggerManager::new(path.clone());
        first
            .start(test_config(vec!["server1".to_owned(), "server2".to_owned()]), memory_backend())
            .await
            .unwrap();
        first.add_devices_to_be_logged(vec!["dev1".to_owned()]).await.unwrap();
        let original = first.logger_map().await;

        let second = LoggerManager::new(path);
        second
            .start(test_config(vec!["server1".to_owned(), "server2".to_owned()]), memory_backend())
            .await
            .unwrap();
        second.add_devices_to_be_logged(vec!["dev2".to_owned()]).await.unwrap();

        let extended = second.logger_map().await;
        assert_eq!(2, extended.len());
        assert!(extended.contains(&original[0]));
    }

    #[tokio::test]
    async fn test_inconsistent_map_enters_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loggermap.xml");

        let seed = LoggerManager::new(path.clone());
        seed.start(test_config(vec!["server1".to_owned()]), memory_backend()).await.unwrap();
        seed.add_devices_to_be_logged(vec!["dev1".to_owned()]).await.unwrap();

        let manager = LoggerManager::new(path);
        let result = manager.start(test_config(vec!["server2".to_owned()]), memory_backend()).await;
        assert!(matches!(result, Err(ManagerError::InconsistentMap { server }) if server == "server1"));
        assert_eq!(ManagerState::Error, manager.state().await);
    }

    #[tokio::test]
    async fn test_tag_discontinued_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LoggerManager::new(dir.path().join("loggermap.xml"));
        manager.tag_device_to_be_discontinued("shutdown".to_owned(), "dev1".to_owned()).await;
        manager.tag_device_to_be_discontinued("shutdown".to_owned(), "dev1".to_owned()).await;
        assert!(manager.is_discontinued("dev1").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tag_discontinued_reaches_owning_logger() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LoggerManager::new(dir.path().join("loggermap.xml"));
        manager.start(test_config(vec!["server1".to_owned()]), memory_backend()).await.unwrap();
        manager.add_devices_to_be_logged(vec!["dev1".to_owned()]).await.unwrap();

        let logger = manager.logger_for_device("dev1").await.unwrap();
        manager.tag_device_to_be_discontinued("shutdown".to_owned(), "dev1".to_owned()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(logger.snapshot().devices_not_logged.contains("dev1"));
    }
}
