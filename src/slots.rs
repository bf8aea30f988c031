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

//! RPC-compatible slot dispatch.
//!
//! A thin translation layer: each function here has the exact stable name a
//! remote client calls, takes/returns plain wire-shaped values, and is the
//! only place a [`RemoteException`] gets constructed from a typed error --
//! the core itself only ever returns
//! [`ReaderError`]/[`ManagerError`]/[`LoggerError`].

use crate::error::RemoteException;
use crate::logger::DataLogger;
use crate::manager::LoggerManager;
use crate::reader::{BadDataEntry, ConfigurationAtTime, DataPoint, LogReader};
use crate::timestamp::Timestamp;
use std::collections::HashMap;
use std::time::Duration;

pub async fn slot_get_property_history(
    reader: &LogReader,
    device_id: &str,
    property_path: &str,
    from: Timestamp,
    to: Timestamp,
    max_num_data: u64,
) -> Result<(String, String, Vec<DataPoint>), RemoteException> {
    let points = reader
        .slot_get_property_history(device_id, property_path, from, to, max_num_data)
        .await?;
    Ok((device_id.to_owned(), property_path.to_owned(), points))
}

pub async fn slot_get_configuration_from_past(
    reader: &LogReader,
    device_id: &str,
    at_time: Timestamp,
) -> Result<ConfigurationAtTime, RemoteException> {
    Ok(reader.slot_get_configuration_from_past(device_id, at_time).await?)
}

pub async fn slot_get_bad_data(
    reader: &LogReader,
    from: Timestamp,
    to: Timestamp,
) -> Result<HashMap<String, Vec<BadDataEntry>>, RemoteException> {
    Ok(reader.slot_get_bad_data(from, to).await?)
}

/// `slotTagDeviceToBeDiscontinued`: the Manager forwards the tag to the
/// device's owning [`DataLogger`] itself, so this is a direct call-through.
pub async fn slot_tag_device_to_be_discontinued(
    manager: &LoggerManager,
    reason: String,
    device_id: String,
) {
    manager.tag_device_to_be_discontinued(reason, device_id).await;
}

/// `slotAddDevicesToBeLogged`: the Manager assigns each device to a server
/// and notifies that server's [`DataLogger`] itself.
pub async fn slot_add_devices_to_be_logged(
    manager: &LoggerManager,
    device_ids: Vec<String>,
) -> Result<(), RemoteException> {
    manager.add_devices_to_be_logged(device_ids).await?;
    Ok(())
}

pub async fn flush(logger: &DataLogger, timeout: Duration) -> Result<(), RemoteException> {
    logger.flush(timeout).await.map_err(|e| RemoteException { message: e.to_string() })
}

/// `slotLoggerLevel`: reports the logger's current observable state and
/// status string.
pub fn slot_logger_level(logger: &DataLogger) -> String {
    let snapshot = logger.snapshot();
    format!("{:?}: {}", snapshot.state, snapshot.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendClient;
    use crate::config::{BackendConfig, Config};
    use crate::testutils::MemoryBackend;
    use std::sync::Arc;

    fn test_config() -> Config {
        Config::with_defaults(
            vec!["server1".to_owned()],
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

    #[tokio::test]
    async fn test_slot_get_property_history_empty_is_ok() {
        let memory = Arc::new(MemoryBackend::new());
        let backend = BackendClient::new(memory, 8, Duration::from_secs(5));
        let reader = LogReader::new(&test_config(), backend);

        let (device, path, points) = slot_get_property_history(
            &reader,
            "dev1",
            "p",
            Timestamp::new(0, 0),
            Timestamp::new(10, 0),
            100,
        )
        .await
        .unwrap();
        assert_eq!("dev1", device);
        assert_eq!("p", path);
        assert!(points.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slot_tag_device_to_be_discontinued_updates_both_components() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LoggerManager::new(dir.path().join("loggermap.xml"));
        let memory: Arc<dyn crate::backend::Backend> = Arc::new(MemoryBackend::new());
        manager.start(test_config(), memory).await.unwrap();
        slot_add_devices_to_be_logged(&manager, vec!["dev1".to_owned()]).await.unwrap();

        let logger = manager.logger_for_device("dev1").await.unwrap();

        slot_tag_device_to_be_discontinued(&manager, "shutdown".to_owned(), "dev1".to_owned()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(manager.is_discontinued("dev1").await);
        assert!(logger.snapshot().devices_not_logged.contains("dev1"));
    }
}
