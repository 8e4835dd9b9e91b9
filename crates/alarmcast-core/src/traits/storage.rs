// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence traits read and written by the delivery core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AlarmcastError, ClassifiedError};
use crate::traits::adapter::PluginAdapter;
use crate::types::{Alarm, Channel, Contact, DeadLetterItem, FailureRecord, Modem, ModemHealth};

/// Alarm records, contacts, and deduplication markers.
#[async_trait]
pub trait AlarmStore: PluginAdapter {
    /// Insert the alarm if it is not known yet.
    async fn save_alarm(&self, alarm: &Alarm) -> Result<(), AlarmcastError>;

    /// Active contacts attached to the device.
    async fn active_contacts(&self, imei: &str) -> Result<Vec<Contact>, AlarmcastError>;

    /// Channels already delivered for this alarm id.
    async fn sent_channels(&self, alarm_id: &str) -> Result<Vec<Channel>, AlarmcastError>;

    /// Record a delivered channel; sets the sent flag and timestamp together.
    async fn record_channel_sent(
        &self,
        alarm_id: &str,
        channel: Channel,
        at: DateTime<Utc>,
        retry_count: u32,
    ) -> Result<(), AlarmcastError>;

    /// Record a permanently failed channel; the sent flag stays false.
    async fn record_channel_failed(
        &self,
        alarm_id: &str,
        channel: Channel,
        retry_count: u32,
    ) -> Result<(), AlarmcastError>;

    /// Whether a send for `key` completed at or after `since`.
    async fn dedup_completed(
        &self,
        key: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, AlarmcastError>;

    /// Remember that the send for `key` completed.
    async fn mark_dedup_completed(
        &self,
        key: &str,
        alarm_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AlarmcastError>;

    /// Count an email bounce for a contact.
    async fn record_bounce(&self, contact_id: &str, at: DateTime<Utc>)
    -> Result<(), AlarmcastError>;
}

/// Modem roster and usage counters.
#[async_trait]
pub trait ModemStore: PluginAdapter {
    async fn list_modems(&self) -> Result<Vec<Modem>, AlarmcastError>;

    /// Modem dedicated to a device, if one is assigned.
    async fn device_modem(&self, imei: &str) -> Result<Option<String>, AlarmcastError>;

    /// Persist usage and health after a send attempt.
    async fn update_modem_usage(
        &self,
        modem_id: &str,
        sent_count: u64,
        health: ModemHealth,
    ) -> Result<(), AlarmcastError>;

    /// Administrative package reset: zero the usage counter.
    async fn reset_modem_usage(&self, modem_id: &str) -> Result<(), AlarmcastError>;
}

/// Durable store for messages that exhausted their retry budget.
#[async_trait]
pub trait DeadLetterStore: PluginAdapter {
    /// Store a failed alarm (or one channel of it). Returns the item id.
    async fn push_dead_letter(
        &self,
        alarm_id: &str,
        channel: Option<Channel>,
        payload: &str,
        error: &ClassifiedError,
        attempts: u32,
    ) -> Result<i64, AlarmcastError>;

    /// Items whose next retry is due, oldest first.
    async fn due_dead_letters(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeadLetterItem>, AlarmcastError>;

    /// Record another failed reprocessing attempt.
    async fn reschedule_dead_letter(
        &self,
        id: i64,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        failure: FailureRecord,
    ) -> Result<(), AlarmcastError>;

    async fn remove_dead_letter(&self, id: i64) -> Result<(), AlarmcastError>;

    /// Drop items enqueued before `older_than`. Returns how many were removed.
    async fn purge_dead_letters(&self, older_than: DateTime<Utc>) -> Result<u64, AlarmcastError>;

    async fn dead_letter_count(&self) -> Result<u64, AlarmcastError>;
}

/// Administrative switches owned by the admin surface.
#[async_trait]
pub trait ControlState: PluginAdapter {
    /// Whether consumption is paused.
    async fn is_paused(&self) -> Result<bool, AlarmcastError>;

    /// Whether a channel runs in mock mode (no provider calls).
    async fn is_mock(&self, channel: Channel) -> Result<bool, AlarmcastError>;
}
