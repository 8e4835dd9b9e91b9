// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Alarm processor: one alarm from validation to recorded outcome.
//!
//! The processor validates the alarm, skips duplicates, resolves the
//! recipients of every requested channel, and runs the channels
//! concurrently. Each channel send runs under the channel's concurrency
//! limit inside a retry loop that only re-sends to recipients that failed
//! retryably. Channels that end without reaching anyone are recorded as
//! failed and handed to the dead-letter store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use tracing::{debug, info, warn};

use alarmcast_config::model::ProcessorConfig;
use alarmcast_core::{
    Alarm, AlarmStore, AlarmcastError, Channel, ChannelSender, ClassifiedError, Contact,
    ControlState, DeadLetterStore, DeliveryAttemptResult, ErrorKind, RecipientOutcome, Severity,
    BOUNCE_CATEGORY,
};
use alarmcast_resilience::{BackoffStrategy, ChannelLimiters, Retry, RetryPolicy};

/// Provider name recorded for mock-mode sends.
pub const MOCK_PROVIDER: &str = "mock";

/// How one channel of one alarm ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// At least one recipient was reached.
    Sent,
    /// Delivered by an earlier run for the same alarm id.
    AlreadySent,
    /// Mock mode: recorded as sent without a provider call.
    Mocked,
    /// Nothing to do: no sender configured or nobody to reach.
    Skipped(String),
    /// Nobody reached; the failure was recorded on the alarm.
    Failed,
    /// Nobody reached; the channel was moved to the dead-letter store.
    DeadLettered { dead_letter_id: i64 },
}

/// Outcome of one channel.
#[derive(Debug, Clone)]
pub struct ChannelReport {
    pub channel: Channel,
    pub status: ChannelStatus,
    /// Send calls made, including the first.
    pub attempts: u32,
    pub delivered: Vec<RecipientOutcome>,
    pub failed: Vec<RecipientOutcome>,
    /// Error that ended the channel, for failed channels.
    pub error: Option<ClassifiedError>,
}

impl ChannelReport {
    fn settled(channel: Channel, status: ChannelStatus) -> Self {
        Self {
            channel,
            status,
            attempts: 0,
            delivered: Vec::new(),
            failed: Vec::new(),
            error: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            ChannelStatus::Failed | ChannelStatus::DeadLettered { .. }
        )
    }
}

/// Per-channel outcomes of one processed alarm.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub alarm_id: String,
    pub channels: Vec<ChannelReport>,
}

impl ProcessReport {
    /// No channel ended in failure.
    pub fn is_complete(&self) -> bool {
        !self.channels.iter().any(ChannelReport::is_failure)
    }

    pub fn channel(&self, channel: Channel) -> Option<&ChannelReport> {
        self.channels.iter().find(|r| r.channel == channel)
    }

    /// Error of the first failed channel.
    pub fn first_error(&self) -> Option<&ClassifiedError> {
        self.channels
            .iter()
            .filter(|r| r.is_failure())
            .find_map(|r| r.error.as_ref())
    }
}

/// Result of [`AlarmProcessor::process`].
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Processed(ProcessReport),
    /// A send for the same dedup key already completed inside the window,
    /// or is running right now.
    Duplicate { key: String },
}

/// Dedup key held by a running [`AlarmProcessor::process`] call.
struct Claim<'a> {
    claims: &'a DashMap<String, String>,
    key: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.key);
    }
}

struct Route {
    sender: Arc<dyn ChannelSender>,
    policy: RetryPolicy,
}

/// Builder for [`AlarmProcessor`].
pub struct AlarmProcessorBuilder {
    store: Arc<dyn AlarmStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    control: Arc<dyn ControlState>,
    config: ProcessorConfig,
    routes: HashMap<Channel, Route>,
    limits: Vec<(Channel, usize)>,
}

impl AlarmProcessorBuilder {
    /// Register the sender for its channel.
    ///
    /// `max_concurrent` bounds simultaneous sends on the channel and
    /// `max_retries` is the attempt budget of one channel send.
    pub fn channel(
        mut self,
        sender: Arc<dyn ChannelSender>,
        max_concurrent: usize,
        max_retries: u32,
    ) -> Self {
        let channel = sender.channel();
        let policy = RetryPolicy::new(
            max_retries,
            Duration::from_millis(self.config.retry_base_delay_ms),
            Duration::from_millis(self.config.retry_max_delay_ms),
        )
        .with_strategy(BackoffStrategy::from(self.config.backoff));
        self.routes.insert(channel, Route { sender, policy });
        self.limits.retain(|(c, _)| *c != channel);
        self.limits.push((channel, max_concurrent));
        self
    }

    pub fn build(self) -> AlarmProcessor {
        AlarmProcessor {
            store: self.store,
            dead_letters: self.dead_letters,
            control: self.control,
            dedup_window: Duration::from_secs(self.config.dedup_window_secs.max(1)),
            config: self.config,
            routes: self.routes,
            limiters: ChannelLimiters::new(self.limits),
            in_flight: DashMap::new(),
        }
    }
}

/// Orchestrates delivery of one alarm over every requested channel.
pub struct AlarmProcessor {
    store: Arc<dyn AlarmStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    control: Arc<dyn ControlState>,
    config: ProcessorConfig,
    dedup_window: Duration,
    routes: HashMap<Channel, Route>,
    limiters: ChannelLimiters,
    /// Dedup keys being processed, to the alarm id holding them.
    in_flight: DashMap<String, String>,
}

impl std::fmt::Debug for AlarmProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmProcessor")
            .field("channels", &self.routes.keys().collect::<Vec<_>>())
            .field("dedup_window", &self.dedup_window)
            .finish_non_exhaustive()
    }
}

impl AlarmProcessor {
    pub fn builder(
        store: Arc<dyn AlarmStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        control: Arc<dyn ControlState>,
        config: ProcessorConfig,
    ) -> AlarmProcessorBuilder {
        AlarmProcessorBuilder {
            store,
            dead_letters,
            control,
            config,
            routes: HashMap::new(),
            limits: Vec::new(),
        }
    }

    /// Channels with a registered sender.
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.routes.keys().copied().collect();
        channels.sort();
        channels
    }

    /// Process a freshly consumed alarm.
    ///
    /// Duplicates return [`ProcessOutcome::Duplicate`] without touching any
    /// provider. Otherwise every requested channel is attempted, failed
    /// channels are dead-lettered, and the dedup marker is written once
    /// every channel has been handled.
    ///
    /// The dedup key is claimed for the whole call, so a redelivery that
    /// arrives while the first copy is still sending is also a duplicate.
    /// If the first copy fails, its own message is redelivered.
    pub async fn process(&self, alarm: &Alarm) -> Result<ProcessOutcome, AlarmcastError> {
        let started = Instant::now();
        alarm.validate()?;

        let key = alarm.dedup_key(self.dedup_window);
        let Some(_claim) = self.claim(&key, &alarm.id) else {
            info!(alarm_id = %alarm.id, key = %key, "duplicate alarm already in flight");
            alarmcast_prometheus::record_duplicate();
            return Ok(ProcessOutcome::Duplicate { key });
        };
        let since = Utc::now()
            - chrono::Duration::from_std(self.dedup_window)
                .map_err(|e| AlarmcastError::Internal(format!("dedup window: {e}")))?;
        if self.store.dedup_completed(&key, since).await? {
            info!(alarm_id = %alarm.id, key = %key, "duplicate alarm skipped");
            alarmcast_prometheus::record_duplicate();
            return Ok(ProcessOutcome::Duplicate { key });
        }

        self.store.save_alarm(alarm).await?;
        let report = self
            .deliver(alarm, &alarm.requested_channels(), true)
            .await?;
        self.store
            .mark_dedup_completed(&key, &alarm.id, Utc::now())
            .await?;

        alarmcast_prometheus::record_processing_latency(started.elapsed().as_secs_f64());
        info!(
            alarm_id = %alarm.id,
            complete = report.is_complete(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "alarm processed"
        );
        Ok(ProcessOutcome::Processed(report))
    }

    fn claim(&self, key: &str, alarm_id: &str) -> Option<Claim<'_>> {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(held) => {
                debug!(key, holder = %held.get(), "dedup key held");
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(alarm_id.to_string());
                Some(Claim {
                    claims: &self.in_flight,
                    key: key.to_string(),
                })
            }
        }
    }

    /// Replay a dead-lettered alarm.
    ///
    /// Bypasses deduplication and never dead-letters again; the caller owns
    /// the dead-letter item. `channel` limits the replay to one channel,
    /// `None` replays every requested channel.
    pub async fn reprocess(
        &self,
        alarm: &Alarm,
        channel: Option<Channel>,
    ) -> Result<ProcessReport, AlarmcastError> {
        alarm.validate()?;
        self.store.save_alarm(alarm).await?;
        let targets = match channel {
            Some(c) => vec![c],
            None => alarm.requested_channels(),
        };
        self.deliver(alarm, &targets, false).await
    }

    async fn deliver(
        &self,
        alarm: &Alarm,
        targets: &[Channel],
        dead_letter: bool,
    ) -> Result<ProcessReport, AlarmcastError> {
        let already_sent: HashSet<Channel> =
            self.store.sent_channels(&alarm.id).await?.into_iter().collect();
        let contacts = self.reachable_contacts(alarm).await?;

        let runs = targets.iter().map(|&channel| {
            let contacts = &contacts;
            let already = already_sent.contains(&channel) || alarm.is_sent(channel);
            async move {
                if already {
                    debug!(alarm_id = %alarm.id, %channel, "channel already sent");
                    return Ok(ChannelReport::settled(channel, ChannelStatus::AlreadySent));
                }
                self.deliver_channel(alarm, channel, contacts, dead_letter)
                    .await
            }
        });
        let channels = join_all(runs)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, AlarmcastError>>()?;

        Ok(ProcessReport {
            alarm_id: alarm.id.clone(),
            channels,
        })
    }

    /// Active contacts, minus those in quiet hours unless the alarm is urgent.
    async fn reachable_contacts(&self, alarm: &Alarm) -> Result<Vec<Contact>, AlarmcastError> {
        let mut contacts = self.store.active_contacts(&alarm.imei).await?;
        if alarm.priority < self.config.quiet_hours_bypass_priority {
            let now = Utc::now();
            contacts.retain(|c| {
                let quiet = c.in_quiet_hours(now);
                if quiet {
                    debug!(alarm_id = %alarm.id, contact = %c.id, "contact in quiet hours");
                }
                !quiet
            });
        }
        Ok(contacts)
    }

    /// Contacts addressable on `channel`, one per distinct address.
    fn recipients(&self, channel: Channel, contacts: &[Contact]) -> Vec<Contact> {
        let mut seen = HashSet::new();
        contacts
            .iter()
            .filter(|c| {
                channel != Channel::Email || c.bounce_count < self.config.max_email_bounces
            })
            .filter(|c| {
                c.address_for(channel)
                    .is_some_and(|addr| seen.insert(addr.to_string()))
            })
            .cloned()
            .collect()
    }

    async fn deliver_channel(
        &self,
        alarm: &Alarm,
        channel: Channel,
        contacts: &[Contact],
        dead_letter: bool,
    ) -> Result<ChannelReport, AlarmcastError> {
        let Some(route) = self.routes.get(&channel) else {
            warn!(alarm_id = %alarm.id, %channel, "no sender configured for requested channel");
            return Ok(ChannelReport::settled(
                channel,
                ChannelStatus::Skipped("channel disabled".into()),
            ));
        };
        let recipients = self.recipients(channel, contacts);
        if recipients.is_empty() {
            debug!(alarm_id = %alarm.id, %channel, "no recipients on channel");
            return Ok(ChannelReport::settled(
                channel,
                ChannelStatus::Skipped("no recipients".into()),
            ));
        }

        if self.control.is_mock(channel).await? {
            let now = Utc::now();
            self.store
                .record_channel_sent(&alarm.id, channel, now, 0)
                .await?;
            alarmcast_prometheus::record_delivery(&channel.to_string(), MOCK_PROVIDER, true);
            info!(alarm_id = %alarm.id, %channel, "mock mode, provider call skipped");
            let mut report = ChannelReport::settled(channel, ChannelStatus::Mocked);
            report.delivered = recipients
                .iter()
                .filter_map(|c| c.address_for(channel))
                .map(|addr| RecipientOutcome::delivered(addr, None))
                .collect();
            return Ok(report);
        }

        let (attempts, progress, error) = self.send_with_retry(alarm, channel, route, recipients).await;
        let retry_count = attempts.saturating_sub(1);

        let Progress {
            delivered,
            mut failed,
            pending,
            ..
        } = progress;
        if let Some(e) = &error {
            failed.extend(
                pending
                    .iter()
                    .filter_map(|c| c.address_for(channel))
                    .map(|addr| RecipientOutcome::failed(addr, e.clone())),
            );
        }
        for outcome in &failed {
            if let Some(e) = &outcome.error {
                alarmcast_prometheus::record_delivery_failure(
                    &channel.to_string(),
                    &e.kind().to_string(),
                    e.category(),
                );
            }
        }
        if channel == Channel::Email {
            self.record_bounces(contacts, &failed).await?;
        }

        let mut report = ChannelReport {
            channel,
            status: ChannelStatus::Sent,
            attempts,
            delivered,
            failed,
            error,
        };

        if !report.delivered.is_empty() {
            self.store
                .record_channel_sent(&alarm.id, channel, Utc::now(), retry_count)
                .await?;
            if !report.failed.is_empty() {
                warn!(
                    alarm_id = %alarm.id,
                    %channel,
                    delivered = report.delivered.len(),
                    failed = report.failed.len(),
                    "channel partially delivered"
                );
            }
            return Ok(report);
        }

        let error = report
            .error
            .clone()
            .or_else(|| report.failed.iter().find_map(|o| o.error.clone()))
            .unwrap_or_else(|| ClassifiedError::configuration("channel send produced no outcome"));
        self.store
            .record_channel_failed(&alarm.id, channel, retry_count)
            .await?;
        report.status = ChannelStatus::Failed;
        if dead_letter {
            let payload = serde_json::to_string(alarm)?;
            let id = self
                .dead_letters
                .push_dead_letter(&alarm.id, Some(channel), &payload, &error, attempts)
                .await?;
            alarmcast_prometheus::record_dead_letter(&channel.to_string());
            report.status = ChannelStatus::DeadLettered { dead_letter_id: id };
        }
        warn!(
            alarm_id = %alarm.id,
            %channel,
            attempts,
            category = error.category(),
            retryable = error.is_retryable(),
            "channel failed"
        );
        report.error = Some(error);
        Ok(report)
    }

    /// Run the retry loop. Returns the attempt count, the final progress,
    /// and the error that ended the loop, if any.
    async fn send_with_retry(
        &self,
        alarm: &Alarm,
        channel: Channel,
        route: &Route,
        recipients: Vec<Contact>,
    ) -> (u32, Progress, Option<ClassifiedError>) {
        let progress = SharedProgress::new(channel, recipients);
        let shared = &progress;
        let sender = &route.sender;
        let limiters = &self.limiters;
        let channel_label = channel.to_string();

        let result = Retry::new(route.policy.clone())
            .should_retry(ClassifiedError::is_retryable)
            .delay_hint(ClassifiedError::retry_after)
            .on_retry(|attempt, delay, e: &ClassifiedError| {
                alarmcast_prometheus::record_retry(&channel_label);
                warn!(
                    alarm_id = %alarm.id,
                    %channel,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "channel send failed, retrying"
                );
            })
            .run(move |attempt| async move {
                // Held for this attempt only, never across the retry sleep.
                let _permit = limiters.acquire(channel).await.map_err(|e| e.classify())?;
                let pending = shared.pending();
                debug!(alarm_id = %alarm.id, %channel, attempt, recipients = pending.len(), "sending");
                let result = sender.send(alarm, &pending).await;
                alarmcast_prometheus::record_delivery(
                    &channel.to_string(),
                    sender.provider(),
                    result.as_ref().is_ok_and(|r| r.success),
                );
                shared.apply(result)
            })
            .await;

        let progress = progress.into_inner();
        (progress.attempts, progress, result.err())
    }

    async fn record_bounces(
        &self,
        contacts: &[Contact],
        failed: &[RecipientOutcome],
    ) -> Result<(), AlarmcastError> {
        let now = Utc::now();
        for outcome in failed {
            let bounced = outcome
                .error
                .as_ref()
                .is_some_and(|e| e.category() == BOUNCE_CATEGORY);
            if !bounced {
                continue;
            }
            for contact in contacts
                .iter()
                .filter(|c| c.address_for(Channel::Email) == Some(outcome.recipient.as_str()))
            {
                info!(contact = %contact.id, address = %outcome.recipient, "email bounced");
                self.store.record_bounce(&contact.id, now).await?;
            }
        }
        Ok(())
    }
}

/// Recipient bookkeeping across the attempts of one channel send.
#[derive(Debug, Default)]
struct Progress {
    attempts: u32,
    /// Recipients still owed a retry.
    pending: Vec<Contact>,
    delivered: Vec<RecipientOutcome>,
    /// Recipients that failed permanently.
    failed: Vec<RecipientOutcome>,
}

struct SharedProgress {
    channel: Channel,
    inner: Mutex<Progress>,
}

impl SharedProgress {
    fn new(channel: Channel, recipients: Vec<Contact>) -> Self {
        Self {
            channel,
            inner: Mutex::new(Progress {
                pending: recipients,
                ..Progress::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending(&self) -> Vec<Contact> {
        self.lock().pending.clone()
    }

    fn into_inner(self) -> Progress {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    /// Fold one attempt in. `Err` carries the retryable error that leaves
    /// recipients pending, or the channel-level error.
    fn apply(
        &self,
        result: Result<DeliveryAttemptResult, ClassifiedError>,
    ) -> Result<(), ClassifiedError> {
        let mut p = self.lock();
        p.attempts += 1;
        let result = result?;

        let mut retry: HashSet<String> = HashSet::new();
        let mut answered: HashSet<String> = HashSet::new();
        let mut last_retryable = None;
        for outcome in result.outcomes {
            answered.insert(outcome.recipient.clone());
            let retryable = outcome.error.as_ref().filter(|e| e.is_retryable()).cloned();
            if let Some(e) = retryable {
                retry.insert(outcome.recipient);
                last_retryable = Some(e);
            } else if outcome.success && outcome.error.is_none() {
                p.delivered.push(outcome);
            } else {
                p.failed.push(outcome);
            }
        }
        let channel = self.channel;
        for contact in std::mem::take(&mut p.pending) {
            let Some(address) = contact.address_for(channel).map(str::to_string) else {
                continue;
            };
            if retry.contains(&address) {
                p.pending.push(contact);
            } else if !answered.contains(&address) {
                warn!(%channel, recipient = %address, "sender reported no outcome for recipient");
                p.failed
                    .push(RecipientOutcome::failed(address, missing_outcome(channel)));
            }
        }

        match last_retryable {
            Some(e) if !p.pending.is_empty() => Err(e),
            _ => Ok(()),
        }
    }
}

fn missing_outcome(channel: Channel) -> ClassifiedError {
    ClassifiedError::new(
        ErrorKind::Provider,
        false,
        Severity::Medium,
        "missing_outcome",
        format!("{channel} sender returned no outcome for this recipient"),
    )
}
