// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed [`AlarmQueue`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use alarmcast_config::model::QueueConfig;
use alarmcast_core::{AlarmQueue, AlarmcastError, HealthStatus, PluginAdapter, QueueMessage};

use crate::database::Database;
use crate::queries;

/// Crash-safe alarm queue stored in the `queue` table.
///
/// Shares the storage's [`Database`] handle, so queue writes are serialized
/// with every other write.
#[derive(Debug, Clone)]
pub struct SqliteQueue {
    db: Database,
    lock_timeout: Duration,
}

impl SqliteQueue {
    pub fn new(db: Database, lock_timeout: Duration) -> Self {
        Self { db, lock_timeout }
    }

    pub fn from_config(db: Database, config: &QueueConfig) -> Self {
        Self::new(db, Duration::from_secs(config.lock_timeout_secs))
    }

    /// Message counts per status.
    pub async fn counts(&self) -> Result<Vec<(String, u64)>, AlarmcastError> {
        queries::queue::counts_by_status(&self.db).await
    }

    /// Drop finished messages older than `before`.
    pub async fn purge_finished(
        &self,
        before: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, AlarmcastError> {
        queries::queue::purge_completed(&self.db, before).await
    }
}

#[async_trait]
impl PluginAdapter for SqliteQueue {
    fn name(&self) -> &str {
        "sqlite-queue"
    }

    async fn health_check(&self) -> Result<HealthStatus, AlarmcastError> {
        match queries::queue::depth(&self.db).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }
}

#[async_trait]
impl AlarmQueue for SqliteQueue {
    async fn publish(&self, payload: &str) -> Result<i64, AlarmcastError> {
        let id = queries::queue::publish(&self.db, payload).await?;
        debug!(id, "message published");
        Ok(id)
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<QueueMessage>, AlarmcastError> {
        queries::queue::fetch(&self.db, limit, self.lock_timeout).await
    }

    async fn ack(&self, id: i64) -> Result<(), AlarmcastError> {
        queries::queue::ack(&self.db, id).await
    }

    async fn nack(&self, id: i64, delay: Duration) -> Result<(), AlarmcastError> {
        queries::queue::nack(&self.db, id, delay).await
    }

    async fn requeue(&self, id: i64) -> Result<(), AlarmcastError> {
        queries::queue::requeue(&self.db, id).await
    }

    async fn dead_letter(&self, id: i64) -> Result<(), AlarmcastError> {
        queries::queue::dead_letter(&self.db, id).await
    }

    async fn release_expired(&self) -> Result<u64, AlarmcastError> {
        let released = queries::queue::release_expired(&self.db).await?;
        if released > 0 {
            warn!(released, "released messages with expired processing locks");
        }
        Ok(released)
    }

    async fn depth(&self) -> Result<u64, AlarmcastError> {
        queries::queue::depth(&self.db).await
    }
}
