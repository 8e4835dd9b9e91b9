// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! File-backed storage and queue sharing one database.

use std::time::Duration;

use alarmcast_config::model::StorageConfig;
use alarmcast_core::{AlarmQueue, AlarmStore, Channel, ControlState};
use alarmcast_storage::{SqliteQueue, SqliteStorage};
use chrono::Utc;

#[tokio::test]
async fn queue_and_store_share_database_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        database_path: dir.path().join("alarmcast.db").to_str().unwrap().to_string(),
        wal_mode: true,
    };

    let storage = SqliteStorage::new(config.clone());
    storage.initialize().await.unwrap();
    let queue = SqliteQueue::new(storage.database().unwrap().clone(), Duration::from_secs(300));

    queue.publish(r#"{"id":"a-1"}"#).await.unwrap();
    storage.set_paused(true).await.unwrap();
    storage
        .mark_dedup_completed("356938035643809:sos:1", "a-1", Utc::now())
        .await
        .unwrap();
    storage.database().unwrap().clone().close().await.unwrap();

    let storage = SqliteStorage::new(config);
    storage.initialize().await.unwrap();
    let queue = SqliteQueue::new(storage.database().unwrap().clone(), Duration::from_secs(300));
    assert!(storage.is_paused().await.unwrap());
    assert!(!storage.is_mock(Channel::Email).await.unwrap());
    assert_eq!(queue.depth().await.unwrap(), 1);
    assert!(
        storage
            .dedup_completed("356938035643809:sos:1", Utc::now() - chrono::Duration::minutes(5))
            .await
            .unwrap()
    );
}
