// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory implementation of every storage trait.
//!
//! `MemoryStore` keeps contacts, modems, delivery records, dedup markers,
//! dead letters, and control flags behind one `std::sync::Mutex`. Setup
//! helpers are synchronous so fixtures can be seeded without `.await`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use alarmcast_core::{
    AlarmStore, Alarm, AlarmcastError, Channel, ClassifiedError, Contact, ControlState,
    DeadLetterItem, DeadLetterStore, FailureRecord, HealthStatus, Modem, ModemHealth, ModemStore,
    PluginAdapter,
};

/// Delivery bookkeeping for one (alarm, channel).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRecord {
    pub sent_at: Option<DateTime<Utc>>,
    pub failed: bool,
    pub retry_count: u32,
}

#[derive(Debug, Default)]
struct Inner {
    alarms: HashMap<String, Alarm>,
    contacts: BTreeMap<String, Contact>,
    channels: HashMap<(String, Channel), ChannelRecord>,
    dedup: HashMap<String, DateTime<Utc>>,
    modems: BTreeMap<String, Modem>,
    device_modems: HashMap<String, String>,
    dead_letters: BTreeMap<i64, DeadLetterItem>,
    next_dead_letter: i64,
    paused: bool,
    mock: HashSet<Channel>,
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    dead_letter_delay: Duration,
}

impl MemoryStore {
    /// Empty store. Dead letters are due immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before a new dead letter is first due.
    pub fn with_dead_letter_delay(mut self, delay: Duration) -> Self {
        self.dead_letter_delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_contact(&self, contact: Contact) {
        self.lock().contacts.insert(contact.id.clone(), contact);
    }

    pub fn contact(&self, id: &str) -> Option<Contact> {
        self.lock().contacts.get(id).cloned()
    }

    pub fn add_modem(&self, modem: Modem) {
        self.lock().modems.insert(modem.id.clone(), modem);
    }

    pub fn modem(&self, id: &str) -> Option<Modem> {
        self.lock().modems.get(id).cloned()
    }

    pub fn assign_device(&self, imei: &str, modem_id: &str) {
        self.lock()
            .device_modems
            .insert(imei.to_string(), modem_id.to_string());
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    pub fn set_mock(&self, channel: Channel, on: bool) {
        let mut inner = self.lock();
        if on {
            inner.mock.insert(channel);
        } else {
            inner.mock.remove(&channel);
        }
    }

    /// The saved alarm with delivered channels stamped in.
    pub fn alarm(&self, id: &str) -> Option<Alarm> {
        let inner = self.lock();
        let mut alarm = inner.alarms.get(id)?.clone();
        for channel in Channel::ALL {
            if let Some(at) = inner
                .channels
                .get(&(id.to_string(), channel))
                .and_then(|r| r.sent_at)
            {
                alarm.mark_sent(channel, at);
            }
        }
        Some(alarm)
    }

    pub fn channel_record(&self, alarm_id: &str, channel: Channel) -> Option<ChannelRecord> {
        self.lock()
            .channels
            .get(&(alarm_id.to_string(), channel))
            .cloned()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterItem> {
        self.lock().dead_letters.values().cloned().collect()
    }

    pub fn dedup_marker(&self, key: &str) -> Option<DateTime<Utc>> {
        self.lock().dedup.get(key).copied()
    }
}

#[async_trait]
impl PluginAdapter for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> Result<HealthStatus, AlarmcastError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl AlarmStore for MemoryStore {
    async fn save_alarm(&self, alarm: &Alarm) -> Result<(), AlarmcastError> {
        self.lock()
            .alarms
            .entry(alarm.id.clone())
            .or_insert_with(|| alarm.clone());
        Ok(())
    }

    async fn active_contacts(&self, imei: &str) -> Result<Vec<Contact>, AlarmcastError> {
        let mut contacts: Vec<Contact> = self
            .lock()
            .contacts
            .values()
            .filter(|c| c.active && c.device_imei == imei)
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(contacts)
    }

    async fn sent_channels(&self, alarm_id: &str) -> Result<Vec<Channel>, AlarmcastError> {
        let inner = self.lock();
        Ok(Channel::ALL
            .into_iter()
            .filter(|c| {
                inner
                    .channels
                    .get(&(alarm_id.to_string(), *c))
                    .is_some_and(|r| r.sent_at.is_some())
            })
            .collect())
    }

    async fn record_channel_sent(
        &self,
        alarm_id: &str,
        channel: Channel,
        at: DateTime<Utc>,
        retry_count: u32,
    ) -> Result<(), AlarmcastError> {
        let mut inner = self.lock();
        let record = inner
            .channels
            .entry((alarm_id.to_string(), channel))
            .or_default();
        record.sent_at = Some(at);
        record.failed = false;
        record.retry_count = retry_count;
        Ok(())
    }

    async fn record_channel_failed(
        &self,
        alarm_id: &str,
        channel: Channel,
        retry_count: u32,
    ) -> Result<(), AlarmcastError> {
        let mut inner = self.lock();
        let record = inner
            .channels
            .entry((alarm_id.to_string(), channel))
            .or_default();
        record.failed = true;
        record.retry_count = retry_count;
        Ok(())
    }

    async fn dedup_completed(
        &self,
        key: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, AlarmcastError> {
        Ok(self.lock().dedup.get(key).is_some_and(|at| *at >= since))
    }

    async fn mark_dedup_completed(
        &self,
        key: &str,
        _alarm_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AlarmcastError> {
        self.lock().dedup.insert(key.to_string(), at);
        Ok(())
    }

    async fn record_bounce(&self, contact_id: &str, at: DateTime<Utc>) -> Result<(), AlarmcastError> {
        if let Some(c) = self.lock().contacts.get_mut(contact_id) {
            c.bounce_count += 1;
            c.last_bounce_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl ModemStore for MemoryStore {
    async fn list_modems(&self) -> Result<Vec<Modem>, AlarmcastError> {
        Ok(self.lock().modems.values().cloned().collect())
    }

    async fn device_modem(&self, imei: &str) -> Result<Option<String>, AlarmcastError> {
        Ok(self.lock().device_modems.get(imei).cloned())
    }

    async fn update_modem_usage(
        &self,
        modem_id: &str,
        sent_count: u64,
        health: ModemHealth,
    ) -> Result<(), AlarmcastError> {
        if let Some(m) = self.lock().modems.get_mut(modem_id) {
            m.sent_count = sent_count;
            m.health = health;
        }
        Ok(())
    }

    async fn reset_modem_usage(&self, modem_id: &str) -> Result<(), AlarmcastError> {
        match self.lock().modems.get_mut(modem_id) {
            Some(m) => {
                m.sent_count = 0;
                m.health = ModemHealth::Healthy;
                Ok(())
            }
            None => Err(AlarmcastError::Validation {
                field: Some("modem_id".into()),
                message: format!("unknown modem {modem_id}"),
            }),
        }
    }
}

#[async_trait]
impl DeadLetterStore for MemoryStore {
    async fn push_dead_letter(
        &self,
        alarm_id: &str,
        channel: Option<Channel>,
        payload: &str,
        error: &ClassifiedError,
        attempts: u32,
    ) -> Result<i64, AlarmcastError> {
        let now = Utc::now();
        let failure = FailureRecord::from_error(error, now);
        let next_retry_at = now
            + chrono::Duration::from_std(self.dead_letter_delay)
                .unwrap_or_else(|_| chrono::Duration::zero());
        let mut inner = self.lock();
        inner.next_dead_letter += 1;
        let id = inner.next_dead_letter;
        inner.dead_letters.insert(
            id,
            DeadLetterItem {
                id,
                alarm_id: alarm_id.to_string(),
                channel,
                payload: payload.to_string(),
                attempts,
                last_error: failure.clone(),
                history: vec![failure],
                enqueued_at: now,
                next_retry_at,
            },
        );
        Ok(id)
    }

    async fn due_dead_letters(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeadLetterItem>, AlarmcastError> {
        let mut due: Vec<DeadLetterItem> = self
            .lock()
            .dead_letters
            .values()
            .filter(|d| d.next_retry_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|d| (d.next_retry_at, d.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn reschedule_dead_letter(
        &self,
        id: i64,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        failure: FailureRecord,
    ) -> Result<(), AlarmcastError> {
        if let Some(d) = self.lock().dead_letters.get_mut(&id) {
            d.attempts = attempts;
            d.next_retry_at = next_retry_at;
            d.last_error = failure.clone();
            d.history.push(failure);
        }
        Ok(())
    }

    async fn remove_dead_letter(&self, id: i64) -> Result<(), AlarmcastError> {
        self.lock().dead_letters.remove(&id);
        Ok(())
    }

    async fn purge_dead_letters(&self, older_than: DateTime<Utc>) -> Result<u64, AlarmcastError> {
        let mut inner = self.lock();
        let before = inner.dead_letters.len();
        inner.dead_letters.retain(|_, d| d.enqueued_at >= older_than);
        Ok((before - inner.dead_letters.len()) as u64)
    }

    async fn dead_letter_count(&self) -> Result<u64, AlarmcastError> {
        Ok(self.lock().dead_letters.len() as u64)
    }
}

#[async_trait]
impl ControlState for MemoryStore {
    async fn is_paused(&self) -> Result<bool, AlarmcastError> {
        Ok(self.lock().paused)
    }

    async fn is_mock(&self, channel: Channel) -> Result<bool, AlarmcastError> {
        Ok(self.lock().mock.contains(&channel))
    }
}
