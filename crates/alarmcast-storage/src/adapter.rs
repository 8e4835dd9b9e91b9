// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the core store traits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use alarmcast_config::model::StorageConfig;
use alarmcast_core::{
    Alarm, AlarmStore, AlarmcastError, Channel, ClassifiedError, Contact, ControlState,
    DeadLetterItem, DeadLetterStore, FailureRecord, HealthStatus, Modem, ModemHealth,
    ModemStore, PluginAdapter,
};

use crate::database::Database;
use crate::queries;

/// SQLite-backed storage adapter.
///
/// The database is opened lazily by [`SqliteStorage::initialize`]; every other
/// call fails with a storage error until then.
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
    dead_letter_delay: Duration,
}

impl SqliteStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
            dead_letter_delay: Duration::from_secs(60),
        }
    }

    /// Delay before a new dead-letter item is first reprocessed.
    pub fn with_dead_letter_delay(mut self, delay: Duration) -> Self {
        self.dead_letter_delay = delay;
        self
    }

    /// Open the database and apply migrations.
    pub async fn initialize(&self) -> Result<(), AlarmcastError> {
        let path = self.config.database_path.clone();
        let db = Database::open(&path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| AlarmcastError::Storage {
            source: "storage already initialized".into(),
        })?;
        info!(path = %self.config.database_path, "sqlite storage initialized");
        Ok(())
    }

    /// Wrap an already-open database.
    pub fn from_database(config: StorageConfig, db: Database) -> Self {
        let storage = Self::new(config);
        // A fresh OnceCell cannot be set already.
        let _ = storage.db.set(db);
        storage
    }

    /// The underlying database, shared with [`SqliteQueue`](crate::SqliteQueue).
    pub fn database(&self) -> Result<&Database, AlarmcastError> {
        self.db.get().ok_or_else(|| AlarmcastError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }

    // --- Administration ---

    pub async fn set_paused(&self, paused: bool) -> Result<(), AlarmcastError> {
        queries::control::set_paused(self.database()?, paused).await?;
        info!(paused, "processing pause flag changed");
        Ok(())
    }

    pub async fn set_mock(&self, channel: Channel, on: bool) -> Result<(), AlarmcastError> {
        queries::control::set_mock(self.database()?, channel, on).await?;
        info!(%channel, mock = on, "channel mock flag changed");
        Ok(())
    }

    pub async fn upsert_contact(&self, contact: &Contact) -> Result<(), AlarmcastError> {
        queries::contacts::upsert_contact(self.database()?, contact).await
    }

    pub async fn upsert_modem(&self, modem: &Modem) -> Result<(), AlarmcastError> {
        queries::modems::upsert_modem(self.database()?, modem).await
    }

    pub async fn assign_device_modem(
        &self,
        imei: &str,
        modem_id: Option<&str>,
    ) -> Result<(), AlarmcastError> {
        queries::modems::assign_device(self.database()?, imei, modem_id).await
    }

    pub async fn load_alarm(&self, alarm_id: &str) -> Result<Option<Alarm>, AlarmcastError> {
        queries::alarms::get_alarm(self.database()?, alarm_id).await
    }

    pub async fn list_dead_letters(
        &self,
        limit: usize,
    ) -> Result<Vec<DeadLetterItem>, AlarmcastError> {
        queries::dead_letters::list(self.database()?, limit).await
    }

    /// Deactivate contacts that bounced `max_bounces` times or more.
    pub async fn deactivate_bounced_contacts(
        &self,
        max_bounces: u32,
    ) -> Result<u64, AlarmcastError> {
        queries::contacts::deactivate_bounced(self.database()?, max_bounces).await
    }

    /// Drop dedup markers older than `before`.
    pub async fn purge_dedup_markers(&self, before: DateTime<Utc>) -> Result<u64, AlarmcastError> {
        queries::dedup::purge_before(self.database()?, before).await
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn health_check(&self) -> Result<HealthStatus, AlarmcastError> {
        let db = match self.database() {
            Ok(db) => db,
            Err(e) => return Ok(HealthStatus::Unhealthy(e.to_string())),
        };
        db.connection()
            .call(|conn| conn.execute_batch("SELECT 1;"))
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), AlarmcastError> {
        if let Some(db) = self.db.get() {
            db.checkpoint().await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl AlarmStore for SqliteStorage {
    async fn save_alarm(&self, alarm: &Alarm) -> Result<(), AlarmcastError> {
        queries::alarms::save_alarm(self.database()?, alarm).await?;
        Ok(())
    }

    async fn active_contacts(&self, imei: &str) -> Result<Vec<Contact>, AlarmcastError> {
        queries::contacts::active_contacts(self.database()?, imei).await
    }

    async fn sent_channels(&self, alarm_id: &str) -> Result<Vec<Channel>, AlarmcastError> {
        queries::alarms::sent_channels(self.database()?, alarm_id).await
    }

    async fn record_channel_sent(
        &self,
        alarm_id: &str,
        channel: Channel,
        at: DateTime<Utc>,
        retry_count: u32,
    ) -> Result<(), AlarmcastError> {
        queries::alarms::record_channel_sent(self.database()?, alarm_id, channel, at, retry_count)
            .await
    }

    async fn record_channel_failed(
        &self,
        alarm_id: &str,
        channel: Channel,
        retry_count: u32,
    ) -> Result<(), AlarmcastError> {
        queries::alarms::record_channel_failed(self.database()?, alarm_id, channel, retry_count)
            .await
    }

    async fn dedup_completed(
        &self,
        key: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, AlarmcastError> {
        queries::dedup::completed_since(self.database()?, key, since).await
    }

    async fn mark_dedup_completed(
        &self,
        key: &str,
        alarm_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AlarmcastError> {
        queries::dedup::mark_completed(self.database()?, key, alarm_id, at).await
    }

    async fn record_bounce(
        &self,
        contact_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AlarmcastError> {
        let count = queries::contacts::record_bounce(self.database()?, contact_id, at).await?;
        debug!(contact_id, count, "email bounce recorded");
        Ok(())
    }
}

#[async_trait]
impl ModemStore for SqliteStorage {
    async fn list_modems(&self) -> Result<Vec<Modem>, AlarmcastError> {
        queries::modems::list_modems(self.database()?).await
    }

    async fn device_modem(&self, imei: &str) -> Result<Option<String>, AlarmcastError> {
        queries::modems::device_modem(self.database()?, imei).await
    }

    async fn update_modem_usage(
        &self,
        modem_id: &str,
        sent_count: u64,
        health: ModemHealth,
    ) -> Result<(), AlarmcastError> {
        queries::modems::update_usage(self.database()?, modem_id, sent_count, health).await
    }

    async fn reset_modem_usage(&self, modem_id: &str) -> Result<(), AlarmcastError> {
        if !queries::modems::reset_usage(self.database()?, modem_id).await? {
            return Err(AlarmcastError::Validation {
                field: Some("modem_id".into()),
                message: format!("unknown modem `{modem_id}`"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for SqliteStorage {
    async fn push_dead_letter(
        &self,
        alarm_id: &str,
        channel: Option<Channel>,
        payload: &str,
        error: &ClassifiedError,
        attempts: u32,
    ) -> Result<i64, AlarmcastError> {
        let now = Utc::now();
        let next = now
            + chrono::Duration::from_std(self.dead_letter_delay)
                .unwrap_or(chrono::Duration::seconds(60));
        let failure = FailureRecord::from_error(error, now);
        queries::dead_letters::push(
            self.database()?,
            alarm_id,
            channel,
            payload,
            failure,
            attempts,
            next,
        )
        .await
    }

    async fn due_dead_letters(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeadLetterItem>, AlarmcastError> {
        queries::dead_letters::due(self.database()?, now, limit).await
    }

    async fn reschedule_dead_letter(
        &self,
        id: i64,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        failure: FailureRecord,
    ) -> Result<(), AlarmcastError> {
        queries::dead_letters::reschedule(self.database()?, id, attempts, next_retry_at, failure)
            .await
    }

    async fn remove_dead_letter(&self, id: i64) -> Result<(), AlarmcastError> {
        queries::dead_letters::remove(self.database()?, id).await
    }

    async fn purge_dead_letters(&self, older_than: DateTime<Utc>) -> Result<u64, AlarmcastError> {
        queries::dead_letters::purge(self.database()?, older_than).await
    }

    async fn dead_letter_count(&self) -> Result<u64, AlarmcastError> {
        queries::dead_letters::count(self.database()?).await
    }
}

#[async_trait]
impl ControlState for SqliteStorage {
    async fn is_paused(&self) -> Result<bool, AlarmcastError> {
        queries::control::is_paused(self.database()?).await
    }

    async fn is_mock(&self, channel: Channel) -> Result<bool, AlarmcastError> {
        queries::control::is_mock(self.database()?, channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(path: &std::path::Path) -> StorageConfig {
        StorageConfig {
            database_path: path.to_str().unwrap().to_string(),
            wal_mode: true,
        }
    }

    #[tokio::test]
    async fn calls_fail_before_initialize() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(config(&dir.path().join("a.db")));
        assert!(storage.is_paused().await.is_err());
        assert!(matches!(
            storage.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
    }

    #[tokio::test]
    async fn initialize_once() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(config(&dir.path().join("a.db")));
        storage.initialize().await.unwrap();
        assert!(storage.initialize().await.is_err());
        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);
        storage.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn dead_letter_lifecycle_through_trait() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(config(&dir.path().join("a.db")))
            .with_dead_letter_delay(Duration::ZERO);
        storage.initialize().await.unwrap();

        let err = ClassifiedError::configuration("no modem available");
        let id = storage
            .push_dead_letter("a-1", Some(Channel::Sms), "{}", &err, 3)
            .await
            .unwrap();
        let due = storage.due_dead_letters(Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].last_error.category, "configuration");
        assert_eq!(storage.dead_letter_count().await.unwrap(), 1);
        storage.remove_dead_letter(id).await.unwrap();
        assert_eq!(storage.dead_letter_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reset_unknown_modem_is_validation_error() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::new(config(&dir.path().join("a.db")));
        storage.initialize().await.unwrap();
        assert!(matches!(
            storage.reset_modem_usage("ghost").await,
            Err(AlarmcastError::Validation { .. })
        ));
    }
}
