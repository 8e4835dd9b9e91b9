// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the delivery engine.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{ClassifiedError, ErrorKind};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Delivery channel.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Voice,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Email, Channel::Sms, Channel::Voice, Channel::Push];
}

// --- Alarm ---

/// An alarm raised by a tracking device.
///
/// This is also the JSON shape of inbound queue messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: String,
    pub imei: String,
    pub server_time: DateTime<Utc>,
    pub gps_time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default)]
    pub angle: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub satellites: u32,
    /// Alarm kind as reported by the device (e.g. `sos`, `overspeed`).
    pub status: String,
    #[serde(default)]
    pub is_sms: bool,
    #[serde(default)]
    pub is_email: bool,
    #[serde(default)]
    pub is_call: bool,
    #[serde(default)]
    pub is_push: bool,
    #[serde(default)]
    pub sms_sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub email_sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub call_sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub push_sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub category: Option<String>,
}

impl Alarm {
    /// Channels the device asked to be notified on.
    pub fn requested_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.is_requested(*c))
            .collect()
    }

    pub fn is_requested(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.is_email,
            Channel::Sms => self.is_sms,
            Channel::Voice => self.is_call,
            Channel::Push => self.is_push,
        }
    }

    /// When the channel was delivered, if it was.
    pub fn sent_at(&self, channel: Channel) -> Option<DateTime<Utc>> {
        match channel {
            Channel::Email => self.email_sent_at,
            Channel::Sms => self.sms_sent_at,
            Channel::Voice => self.call_sent_at,
            Channel::Push => self.push_sent_at,
        }
    }

    /// A channel is sent exactly when its timestamp is set.
    pub fn is_sent(&self, channel: Channel) -> bool {
        self.sent_at(channel).is_some()
    }

    pub fn mark_sent(&mut self, channel: Channel, at: DateTime<Utc>) {
        let slot = match channel {
            Channel::Email => &mut self.email_sent_at,
            Channel::Sms => &mut self.sms_sent_at,
            Channel::Voice => &mut self.call_sent_at,
            Channel::Push => &mut self.push_sent_at,
        };
        *slot = Some(at);
    }

    /// Check the fields the pipeline relies on.
    pub fn validate(&self) -> Result<(), ClassifiedError> {
        if self.id.trim().is_empty() {
            return Err(ClassifiedError::validation(
                "alarm id must not be empty",
                Some("id".into()),
            ));
        }
        if self.imei.is_empty() || !self.imei.chars().all(|c| c.is_ascii_digit()) {
            return Err(ClassifiedError::validation(
                format!("imei `{}` must be a non-empty string of digits", self.imei),
                Some("imei".into()),
            ));
        }
        if self.status.trim().is_empty() {
            return Err(ClassifiedError::validation(
                "alarm status must not be empty",
                Some("status".into()),
            ));
        }
        if !(-90.0..=90.0).contains(&self.latitude) || self.latitude.is_nan() {
            return Err(ClassifiedError::validation(
                format!("latitude {} out of range", self.latitude),
                Some("latitude".into()),
            ));
        }
        if !(-180.0..=180.0).contains(&self.longitude) || self.longitude.is_nan() {
            return Err(ClassifiedError::validation(
                format!("longitude {} out of range", self.longitude),
                Some("longitude".into()),
            ));
        }
        Ok(())
    }

    /// Deduplication key: device, alarm kind, and GPS time bucket.
    pub fn dedup_key(&self, window: std::time::Duration) -> String {
        let window_secs = window.as_secs().max(1) as i64;
        let bucket = self.gps_time.timestamp().div_euclid(window_secs);
        format!(
            "{}:{}:{}",
            self.imei,
            self.status.trim().to_lowercase(),
            bucket
        )
    }
}

// --- Contacts ---

/// Daily window during which a contact prefers not to be disturbed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// Contact's offset from UTC in minutes.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl QuietHours {
    /// Whether `now` falls inside the window. Windows may wrap midnight.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = (now + ChronoDuration::minutes(self.utc_offset_minutes as i64)).time();
        if self.start <= self.end {
            local >= self.start && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }
}

/// A notification recipient attached to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub device_imei: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub priority: i32,
    pub active: bool,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default)]
    pub bounce_count: u32,
    #[serde(default)]
    pub last_bounce_at: Option<DateTime<Utc>>,
}

impl Contact {
    /// A contact needs at least an email address or a phone number.
    pub fn validate(&self) -> Result<(), ClassifiedError> {
        let has_email = self.email.as_deref().is_some_and(|e| !e.trim().is_empty());
        let has_phone = self.phone.as_deref().is_some_and(|p| !p.trim().is_empty());
        if !has_email && !has_phone {
            return Err(ClassifiedError::validation(
                format!("contact {} has neither email nor phone", self.id),
                Some("email".into()),
            ));
        }
        Ok(())
    }

    /// The address this contact is reached at on `channel`, if any.
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        let addr = match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Sms | Channel::Voice => self.phone.as_deref(),
            Channel::Push => self.push_token.as_deref(),
        };
        addr.filter(|a| !a.trim().is_empty())
    }

    pub fn in_quiet_hours(&self, now: DateTime<Utc>) -> bool {
        self.quiet_hours.as_ref().is_some_and(|q| q.contains(now))
    }
}

// --- Modems ---

/// Service tag a modem may be reserved for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ServiceTag {
    Alarms,
    Commands,
    Otp,
    Marketing,
}

/// Health of an SMS modem as tracked by the pool.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ModemHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Billing package attached to a modem's SIM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModemPackage {
    pub cost: f64,
    pub currency: String,
    pub ends_at: DateTime<Utc>,
}

/// An SMS gateway modem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modem {
    pub id: String,
    pub name: String,
    /// Base URL of the modem's HTTP API.
    pub host: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub allowed_services: Vec<ServiceTag>,
    #[serde(default)]
    pub priority: i32,
    pub max_concurrent: u32,
    pub enabled: bool,
    pub health: ModemHealth,
    #[serde(default)]
    pub sent_count: u64,
    /// `None` means unlimited.
    #[serde(default)]
    pub sent_limit: Option<u64>,
    #[serde(default)]
    pub package: Option<ModemPackage>,
}

impl Modem {
    pub fn permits(&self, service: ServiceTag) -> bool {
        self.allowed_services.contains(&service)
    }

    /// Whether the billing window has ended.
    pub fn package_expired(&self, now: DateTime<Utc>) -> bool {
        self.package.as_ref().is_some_and(|p| p.ends_at <= now)
    }

    /// Sends left before the quota is hit, counting `reserved` in-flight sends.
    pub fn remaining_quota(&self, reserved: u64) -> Option<u64> {
        self.sent_limit
            .map(|limit| limit.saturating_sub(self.sent_count + reserved))
    }

    pub fn has_quota(&self, reserved: u64, now: DateTime<Utc>) -> bool {
        !self.package_expired(now) && self.remaining_quota(reserved).is_none_or(|r| r > 0)
    }

    /// Fraction of quota still available; unlimited modems report 1.0.
    pub fn remaining_fraction(&self, reserved: u64) -> f64 {
        match self.sent_limit {
            None => 1.0,
            Some(0) => 0.0,
            Some(limit) => self.remaining_quota(reserved).unwrap_or(0) as f64 / limit as f64,
        }
    }
}

// --- Delivery results ---

/// What happened for one recipient on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientOutcome {
    pub recipient: String,
    pub success: bool,
    pub provider_message_id: Option<String>,
    /// Modem that carried the message, for SMS.
    pub modem_id: Option<String>,
    pub error: Option<ClassifiedError>,
}

impl RecipientOutcome {
    pub fn delivered(recipient: impl Into<String>, message_id: Option<String>) -> Self {
        Self {
            recipient: recipient.into(),
            success: true,
            provider_message_id: message_id,
            modem_id: None,
            error: None,
        }
    }

    pub fn failed(recipient: impl Into<String>, error: ClassifiedError) -> Self {
        Self {
            recipient: recipient.into(),
            success: false,
            provider_message_id: None,
            modem_id: None,
            error: Some(error),
        }
    }

    pub fn with_modem(mut self, modem_id: impl Into<String>) -> Self {
        self.modem_id = Some(modem_id.into());
        self
    }
}

/// Result of one channel-send call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttemptResult {
    pub channel: Channel,
    pub success: bool,
    pub provider: String,
    pub outcomes: Vec<RecipientOutcome>,
}

impl DeliveryAttemptResult {
    /// Build a result; `success` is true when every recipient was reached.
    pub fn from_outcomes(
        channel: Channel,
        provider: impl Into<String>,
        outcomes: Vec<RecipientOutcome>,
    ) -> Self {
        let success = !outcomes.is_empty() && outcomes.iter().all(|o| o.success);
        Self {
            channel,
            success,
            provider: provider.into(),
            outcomes,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecipientOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }
}

// --- Dead letters ---

/// One recorded failure of a dead-lettered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    pub category: String,
    pub message: String,
    pub retryable: bool,
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn from_error(error: &ClassifiedError, at: DateTime<Utc>) -> Self {
        Self {
            kind: error.kind(),
            category: error.category().to_string(),
            message: error.message().to_string(),
            retryable: error.is_retryable(),
            at,
        }
    }
}

/// A message that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterItem {
    pub id: i64,
    pub alarm_id: String,
    /// `None` when the whole message failed rather than a single channel.
    pub channel: Option<Channel>,
    /// Original alarm JSON.
    pub payload: String,
    pub attempts: u32,
    pub last_error: FailureRecord,
    pub history: Vec<FailureRecord>,
    pub enqueued_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
}

// --- Workers ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Active,
    Stale,
    Dead,
}

/// Liveness record of a consumer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: WorkerStatus,
}
