// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic replay of due dead letters.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use alarmcast_config::model::DeadLetterConfig;
use alarmcast_core::{
    Alarm, AlarmcastError, ClassifiedError, DeadLetterItem, DeadLetterStore, FailureRecord,
};
use alarmcast_resilience::RetryPolicy;

use crate::processor::AlarmProcessor;

/// Counters from one reprocessing cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub recovered: usize,
    pub rescheduled: usize,
    pub purged: u64,
}

pub struct DeadLetterReprocessor {
    store: Arc<dyn DeadLetterStore>,
    processor: Arc<AlarmProcessor>,
    config: DeadLetterConfig,
    policy: RetryPolicy,
}

impl DeadLetterReprocessor {
    pub fn new(
        store: Arc<dyn DeadLetterStore>,
        processor: Arc<AlarmProcessor>,
        config: DeadLetterConfig,
    ) -> Self {
        let policy = RetryPolicy::new(
            u32::MAX,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        );
        Self {
            store,
            processor,
            config,
            policy,
        }
    }

    /// Run a cycle every `interval_secs` until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.interval_secs,
            batch_size = self.config.batch_size,
            "dead-letter reprocessor started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.run_cycle(Utc::now()).await {
                error!(error = %e, "dead-letter cycle failed");
            }
        }
        info!("dead-letter reprocessor stopped");
    }

    /// Replay every item due at `now`, then purge expired items.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, AlarmcastError> {
        let mut report = CycleReport::default();
        for item in self.store.due_dead_letters(now, self.config.batch_size).await? {
            if self.replay(&item).await? {
                report.recovered += 1;
            } else {
                report.rescheduled += 1;
            }
        }

        let cutoff = now - chrono::Duration::days(i64::from(self.config.retention_days));
        report.purged = self.store.purge_dead_letters(cutoff).await?;
        if report.purged > 0 {
            warn!(purged = report.purged, "expired dead letters purged");
        }
        alarmcast_prometheus::set_dead_letter_size(self.store.dead_letter_count().await?);

        if report != CycleReport::default() {
            info!(
                recovered = report.recovered,
                rescheduled = report.rescheduled,
                purged = report.purged,
                "dead-letter cycle finished"
            );
        }
        Ok(report)
    }

    /// Replay one item. Returns whether it was recovered and removed.
    async fn replay(&self, item: &DeadLetterItem) -> Result<bool, AlarmcastError> {
        let outcome = match serde_json::from_str::<Alarm>(&item.payload) {
            Ok(alarm) => match self.processor.reprocess(&alarm, item.channel).await {
                Ok(report) if report.is_complete() => Ok(()),
                Ok(report) => Err(report.first_error().cloned().unwrap_or_else(|| {
                    ClassifiedError::configuration("replay failed without an error")
                })),
                Err(e) => Err(e.classify()),
            },
            Err(e) => Err(ClassifiedError::validation(
                format!("malformed dead-letter payload: {e}"),
                None,
            )),
        };

        match outcome {
            Ok(()) => {
                self.store.remove_dead_letter(item.id).await?;
                alarmcast_prometheus::record_dead_letter_reprocessed(true);
                info!(
                    dead_letter_id = item.id,
                    alarm_id = %item.alarm_id,
                    channel = ?item.channel,
                    "dead letter recovered"
                );
                Ok(true)
            }
            Err(failure) => {
                let attempts = item.attempts + 1;
                let delay = self.policy.delay_for(attempts);
                let next = Utc::now()
                    + chrono::Duration::from_std(delay)
                        .map_err(|e| AlarmcastError::Internal(format!("retry delay: {e}")))?;
                self.store
                    .reschedule_dead_letter(
                        item.id,
                        attempts,
                        next,
                        FailureRecord::from_error(&failure, Utc::now()),
                    )
                    .await?;
                alarmcast_prometheus::record_dead_letter_reprocessed(false);
                debug!(
                    dead_letter_id = item.id,
                    attempts,
                    next_retry_at = %next,
                    category = failure.category(),
                    "dead letter rescheduled"
                );
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarmcast_config::model::ProcessorConfig;
    use alarmcast_core::{classify, AlarmStore, Channel, ProviderFailure};
    use alarmcast_test_utils::{alarm, contact, MemoryStore, ScriptedSender, Step};

    fn config() -> DeadLetterConfig {
        DeadLetterConfig {
            base_delay_ms: 60_000,
            max_delay_ms: 3_600_000,
            retention_days: 7,
            ..DeadLetterConfig::default()
        }
    }

    fn setup(sms: Arc<ScriptedSender>) -> (Arc<MemoryStore>, DeadLetterReprocessor) {
        let store = Arc::new(MemoryStore::new());
        store.add_contact(contact("c1"));
        let processor = AlarmProcessor::builder(
            store.clone(),
            store.clone(),
            store.clone(),
            ProcessorConfig::default(),
        )
        .channel(sms, 5, 1)
        .build();
        let reprocessor = DeadLetterReprocessor::new(store.clone(), Arc::new(processor), config());
        (store, reprocessor)
    }

    fn sms_payload(id: &str) -> String {
        let mut a = alarm(id);
        a.is_email = false;
        serde_json::to_string(&a).unwrap()
    }

    fn unavailable() -> ClassifiedError {
        classify(ProviderFailure::http(503, None, "unavailable"))
    }

    #[tokio::test]
    async fn recovered_items_are_removed_and_marked_sent() {
        let sms = Arc::new(ScriptedSender::new(Channel::Sms));
        let (store, reprocessor) = setup(sms.clone());
        store
            .push_dead_letter("a-1", Some(Channel::Sms), &sms_payload("a-1"), &unavailable(), 3)
            .await
            .unwrap();

        let report = reprocessor.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.recovered, 1);
        assert!(store.dead_letters().is_empty());
        assert!(store.alarm("a-1").unwrap().is_sent(Channel::Sms));
        assert_eq!(sms.call_count(), 1);
    }

    #[tokio::test]
    async fn failures_are_rescheduled_with_backoff() {
        let sms = Arc::new(ScriptedSender::new(Channel::Sms).then(Step::Reject(unavailable())));
        let (store, reprocessor) = setup(sms);
        store
            .push_dead_letter("a-1", Some(Channel::Sms), &sms_payload("a-1"), &unavailable(), 1)
            .await
            .unwrap();

        let before = Utc::now();
        let report = reprocessor.run_cycle(before).await.unwrap();
        assert_eq!(report.rescheduled, 1);

        let item = &store.dead_letters()[0];
        assert_eq!(item.attempts, 2);
        assert_eq!(item.history.len(), 2);
        // Attempt 2: 120 s +/- 25 %.
        let wait = (item.next_retry_at - before).num_milliseconds();
        assert!((90_000..=150_500).contains(&wait), "wait was {wait} ms");

        // Not due again yet.
        let report = reprocessor.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test]
    async fn malformed_payload_is_rescheduled() {
        let (store, reprocessor) = setup(Arc::new(ScriptedSender::new(Channel::Sms)));
        store
            .push_dead_letter("a-1", None, "{broken", &unavailable(), 1)
            .await
            .unwrap();

        let report = reprocessor.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.rescheduled, 1);
        assert_eq!(store.dead_letters()[0].last_error.category, "validation");
    }

    #[tokio::test]
    async fn whole_message_items_replay_every_channel() {
        let sms = Arc::new(ScriptedSender::new(Channel::Sms));
        let (store, reprocessor) = setup(sms.clone());
        store
            .push_dead_letter("a-1", None, &sms_payload("a-1"), &unavailable(), 5)
            .await
            .unwrap();

        reprocessor.run_cycle(Utc::now()).await.unwrap();
        assert!(store.dead_letters().is_empty());
        assert_eq!(store.sent_channels("a-1").await.unwrap(), vec![Channel::Sms]);
    }

    #[tokio::test]
    async fn items_past_retention_are_purged() {
        let (store, reprocessor) = setup(Arc::new(
            ScriptedSender::new(Channel::Sms).then(Step::Reject(unavailable())),
        ));
        store
            .push_dead_letter("a-1", Some(Channel::Sms), &sms_payload("a-1"), &unavailable(), 1)
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::days(8);
        let report = reprocessor.run_cycle(later).await.unwrap();
        assert_eq!(report.purged, 1);
        assert_eq!(store.dead_letter_count().await.unwrap(), 0);
    }
}
