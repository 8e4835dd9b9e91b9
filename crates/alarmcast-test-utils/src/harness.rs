// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed test environment.
//!
//! `TestHarness` opens a migrated database in a temp directory and wraps it
//! in the production [`SqliteStorage`] and [`SqliteQueue`], seeded with the
//! contacts given to the builder.

use std::sync::Arc;
use std::time::Duration;

use alarmcast_config::model::{QueueConfig, StorageConfig};
use alarmcast_core::{AlarmcastError, Contact};
use alarmcast_storage::{SqliteQueue, SqliteStorage};

/// Builder for [`TestHarness`].
pub struct TestHarnessBuilder {
    contacts: Vec<Contact>,
    queue: QueueConfig,
    dead_letter_delay: Duration,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            contacts: Vec::new(),
            queue: QueueConfig::default(),
            dead_letter_delay: Duration::ZERO,
        }
    }

    pub fn with_contact(mut self, contact: Contact) -> Self {
        self.contacts.push(contact);
        self
    }

    pub fn with_queue_config(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Delay before a dead letter is first due. Zero by default.
    pub fn with_dead_letter_delay(mut self, delay: Duration) -> Self {
        self.dead_letter_delay = delay;
        self
    }

    pub async fn build(self) -> Result<TestHarness, AlarmcastError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| AlarmcastError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();

        let storage = SqliteStorage::new(StorageConfig {
            database_path: db_path.clone(),
            wal_mode: true,
        })
        .with_dead_letter_delay(self.dead_letter_delay);
        storage.initialize().await?;
        for contact in &self.contacts {
            storage.upsert_contact(contact).await?;
        }

        let queue = SqliteQueue::from_config(storage.database()?.clone(), &self.queue);

        Ok(TestHarness {
            storage: Arc::new(storage),
            queue: Arc::new(queue),
            db_path,
            _temp_dir: temp_dir,
        })
    }
}

/// Migrated SQLite storage and queue sharing one temp database.
pub struct TestHarness {
    pub storage: Arc<SqliteStorage>,
    pub queue: Arc<SqliteQueue>,
    pub db_path: String,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }
}
