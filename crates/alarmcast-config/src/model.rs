// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the alarmcast delivery engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level alarmcast configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AlarmcastConfig {
    /// Service identity and logging.
    #[serde(default)]
    pub service: ServiceConfig,

    /// SQLite storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Queue consumer settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Alarm processor settings.
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Circuit breaker defaults applied to every endpoint.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// SMS modem pool selection and health settings.
    #[serde(default)]
    pub modem_pool: ModemPoolConfig,

    /// Dead-letter reprocessing settings.
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,

    /// Worker heartbeat and liveness settings.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// SMTP email channel.
    #[serde(default)]
    pub email: EmailConfig,

    /// SMS channel (modem pool).
    #[serde(default)]
    pub sms: SmsConfig,

    /// Voice call channel.
    #[serde(default)]
    pub voice: HttpChannelConfig,

    /// Push notification channel.
    #[serde(default)]
    pub push: HttpChannelConfig,

    /// Metrics settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Service identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Instance name used in logs.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Worker id for the registry. Generated from name and pid when unset.
    #[serde(default)]
    pub worker_id: Option<String>,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format: `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            worker_id: None,
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_service_name() -> String {
    "alarmcast".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("alarmcast").join("alarmcast.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("alarmcast.db"))
        .to_string_lossy()
        .to_string()
}

fn default_wal_mode() -> bool {
    true
}

/// Queue consumer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Messages leased per poll.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    /// Sleep between polls when the queue is empty or paused.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lease duration after which an unacked message is redelivered.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Deliveries before a failing message is dead-lettered.
    #[serde(default = "default_max_message_attempts")]
    pub max_message_attempts: u32,

    /// Base of the nack redelivery backoff.
    #[serde(default = "default_base_delay_ms")]
    pub nack_base_delay_ms: u64,

    /// Cap of the nack redelivery backoff.
    #[serde(default = "default_max_delay_ms")]
    pub nack_max_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefetch: default_prefetch(),
            poll_interval_ms: default_poll_interval_ms(),
            lock_timeout_secs: default_lock_timeout_secs(),
            max_message_attempts: default_max_message_attempts(),
            nack_base_delay_ms: default_base_delay_ms(),
            nack_max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_prefetch() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_lock_timeout_secs() -> u64 {
    300
}

fn default_max_message_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

/// Backoff strategy names accepted in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Exponential,
    Linear,
    Fixed,
}

/// Alarm processor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Width of the deduplication time bucket.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// Base delay of the per-channel retry backoff.
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Cap of the per-channel retry backoff.
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Per-channel retry backoff strategy.
    #[serde(default)]
    pub backoff: BackoffKind,

    /// Alarms at or above this priority ignore contact quiet hours.
    #[serde(default = "default_quiet_hours_bypass_priority")]
    pub quiet_hours_bypass_priority: i32,

    /// Contacts with this many email bounces are not emailed.
    #[serde(default = "default_max_email_bounces")]
    pub max_email_bounces: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            backoff: BackoffKind::default(),
            quiet_hours_bypass_priority: default_quiet_hours_bypass_priority(),
            max_email_bounces: default_max_email_bounces(),
        }
    }
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_quiet_hours_bypass_priority() -> i32 {
    10
}

fn default_max_email_bounces() -> u32 {
    3
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long an open circuit rejects calls.
    #[serde(default = "default_breaker_timeout_secs")]
    pub timeout_secs: u64,

    /// Concurrent probes admitted while half-open.
    #[serde(default = "default_half_open_max_probes")]
    pub half_open_max_probes: u32,

    /// Retry hint returned to calls rejected while probing.
    #[serde(default = "default_busy_retry_after_secs")]
    pub busy_retry_after_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            timeout_secs: default_breaker_timeout_secs(),
            half_open_max_probes: default_half_open_max_probes(),
            busy_retry_after_secs: default_busy_retry_after_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout_secs() -> u64 {
    60
}

fn default_half_open_max_probes() -> u32 {
    1
}

fn default_busy_retry_after_secs() -> u64 {
    2
}

/// SMS modem pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModemPoolConfig {
    /// Service tag alarm SMS are sent under.
    #[serde(default = "default_service")]
    pub service: String,

    /// Consecutive failures before a modem is marked degraded.
    #[serde(default = "default_degraded_after_failures")]
    pub degraded_after_failures: u32,

    /// Consecutive failures before a modem is marked unhealthy.
    #[serde(default = "default_unhealthy_after_failures")]
    pub unhealthy_after_failures: u32,
}

impl Default for ModemPoolConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            degraded_after_failures: default_degraded_after_failures(),
            unhealthy_after_failures: default_unhealthy_after_failures(),
        }
    }
}

fn default_service() -> String {
    "alarms".to_string()
}

fn default_degraded_after_failures() -> u32 {
    2
}

fn default_unhealthy_after_failures() -> u32 {
    5
}

/// Dead-letter reprocessing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeadLetterConfig {
    /// Run the reprocessor at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between reprocessing cycles.
    #[serde(default = "default_dlq_interval_secs")]
    pub interval_secs: u64,

    /// Items replayed per cycle.
    #[serde(default = "default_dlq_batch_size")]
    pub batch_size: usize,

    /// Base of the replay backoff.
    #[serde(default = "default_dlq_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap of the replay backoff.
    #[serde(default = "default_dlq_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Items older than this are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_dlq_interval_secs(),
            batch_size: default_dlq_batch_size(),
            base_delay_ms: default_dlq_base_delay_ms(),
            max_delay_ms: default_dlq_max_delay_ms(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_dlq_interval_secs() -> u64 {
    60
}

fn default_dlq_batch_size() -> usize {
    50
}

fn default_dlq_base_delay_ms() -> u64 {
    60_000
}

fn default_dlq_max_delay_ms() -> u64 {
    3_600_000
}

fn default_retention_days() -> u32 {
    7
}

/// Worker registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Silence after which a worker is reported stale.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Silence after which a worker is dead and removed.
    #[serde(default = "default_dead_after_secs")]
    pub dead_after_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            dead_after_secs: default_dead_after_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_stale_after_secs() -> u64 {
    30
}

fn default_dead_after_secs() -> u64 {
    120
}

fn default_cleanup_interval_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    15
}

/// SMTP email channel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Concurrent sends on this channel.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Attempts per send, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// SMTP relay host. Required when enabled.
    #[serde(default)]
    pub smtp_host: Option<String>,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Use STARTTLS rather than implicit TLS.
    #[serde(default = "default_true")]
    pub starttls: bool,

    /// Sender mailbox, e.g. `Alarms <alarms@example.com>`.
    #[serde(default)]
    pub from: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            smtp_host: None,
            smtp_port: default_smtp_port(),
            username: None,
            password: None,
            starttls: true,
            from: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

/// SMS channel configuration. Modems themselves live in storage.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SmsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Timeout for one modem gateway request.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Configuration shared by the HTTP-backed voice and push channels.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpChannelConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Provider name used in breaker names and results.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Provider endpoint URL. Required when enabled.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            provider: default_provider(),
            endpoint: None,
            api_key: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "gateway".to_string()
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Write the rendered metrics to this file (textfile collector format).
    #[serde(default)]
    pub textfile_path: Option<String>,

    /// Seconds between textfile writes.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            textfile_path: None,
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

fn default_snapshot_interval_secs() -> u64 {
    15
}
