// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue consumer: fetch, process, ack / nack / dead-letter.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use alarmcast_config::model::QueueConfig;
use alarmcast_core::{
    Alarm, AlarmQueue, AlarmcastError, ClassifiedError, ControlState, DeadLetterStore,
    QueueMessage,
};
use alarmcast_resilience::RetryPolicy;

use crate::processor::{AlarmProcessor, ProcessOutcome};

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// Consumption is paused; nothing was fetched.
    Paused,
    /// The queue had nothing ready.
    Idle,
    /// A pause landed after the fetch; this many messages went back unconsumed.
    Requeued(usize),
    /// This many messages were handled.
    Handled(usize),
}

enum Fetched {
    Done(PollResult),
    Ready(Vec<QueueMessage>),
}

/// How one message left the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Acked,
    Nacked,
    DeadLettered,
}

impl Disposition {
    fn label(self) -> &'static str {
        match self {
            Self::Acked => "ack",
            Self::Nacked => "nack",
            Self::DeadLettered => "dead_letter",
        }
    }
}

/// Polls the alarm queue and hands each message to the processor.
pub struct QueueConsumer {
    queue: Arc<dyn AlarmQueue>,
    processor: Arc<AlarmProcessor>,
    control: Arc<dyn ControlState>,
    dead_letters: Arc<dyn DeadLetterStore>,
    config: QueueConfig,
    nack_policy: RetryPolicy,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn AlarmQueue>,
        processor: Arc<AlarmProcessor>,
        control: Arc<dyn ControlState>,
        dead_letters: Arc<dyn DeadLetterStore>,
        config: QueueConfig,
    ) -> Self {
        let nack_policy = RetryPolicy::new(
            config.max_message_attempts,
            Duration::from_millis(config.nack_base_delay_ms),
            Duration::from_millis(config.nack_max_delay_ms),
        );
        Self {
            queue,
            processor,
            control,
            dead_letters,
            config,
            nack_policy,
        }
    }

    /// Consume until `shutdown` fires.
    ///
    /// Keeps up to `prefetch` messages in flight and fetches again as soon
    /// as one settles, so a message stuck in retry only holds its own slot.
    /// On shutdown nothing new is fetched and the in-flight messages run to
    /// completion.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), AlarmcastError> {
        let released = self.queue.release_expired().await?;
        if released > 0 {
            warn!(released, "released expired processing locks on startup");
        }
        let window = self.window();
        info!(prefetch = window, "queue consumer started");

        let idle = Duration::from_millis(self.config.poll_interval_ms);
        let mut in_flight = JoinSet::new();
        while !shutdown.is_cancelled() {
            let free = window.saturating_sub(in_flight.len());
            let mut fetched = 0;
            if free > 0 {
                match self.fetch_ready(free).await {
                    Ok(Fetched::Ready(batch)) => {
                        fetched = batch.len();
                        for message in batch {
                            let consumer = Arc::clone(&self);
                            in_flight.spawn(async move { consumer.settle_logged(&message).await });
                        }
                    }
                    Ok(Fetched::Done(result)) => debug!(?result, "nothing taken"),
                    Err(e) => error!(error = %e, "poll cycle failed"),
                }
            }
            if fetched > 0 && in_flight.len() < window {
                continue;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "message task failed");
                    }
                    self.report_depth().await;
                }
                _ = tokio::time::sleep(idle), if in_flight.len() < window => {}
            }
        }

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "waiting for in-flight messages");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "message task failed");
            }
        }
        info!("queue consumer stopped");
        Ok(())
    }

    /// One fetch-and-handle cycle over a full batch.
    pub async fn poll_once(&self) -> Result<PollResult, AlarmcastError> {
        let batch = match self.fetch_ready(self.window()).await? {
            Fetched::Done(result) => return Ok(result),
            Fetched::Ready(batch) => batch,
        };
        let handled = batch.len();
        join_all(batch.iter().map(|m| self.settle_logged(m))).await;
        self.report_depth().await;
        Ok(PollResult::Handled(handled))
    }

    fn window(&self) -> usize {
        self.config.prefetch.max(1)
    }

    /// Take up to `limit` ready messages, honouring the paused flag on
    /// both sides of the fetch.
    async fn fetch_ready(&self, limit: usize) -> Result<Fetched, AlarmcastError> {
        let released = self.queue.release_expired().await?;
        if released > 0 {
            warn!(released, "released expired processing locks");
        }
        if self.control.is_paused().await? {
            debug!("consumption paused");
            return Ok(Fetched::Done(PollResult::Paused));
        }

        let batch = self.queue.fetch(limit).await?;
        if batch.is_empty() {
            self.report_depth().await;
            return Ok(Fetched::Done(PollResult::Idle));
        }

        if self.control.is_paused().await? {
            for message in &batch {
                self.queue.requeue(message.id).await?;
                alarmcast_prometheus::record_paused_requeue();
            }
            info!(count = batch.len(), "paused after fetch, messages requeued");
            return Ok(Fetched::Done(PollResult::Requeued(batch.len())));
        }
        Ok(Fetched::Ready(batch))
    }

    async fn settle_logged(&self, message: &QueueMessage) {
        if let Err(e) = self.handle(message).await {
            error!(message_id = message.id, error = %e, "failed to settle message");
        }
    }

    async fn report_depth(&self) {
        match self.queue.depth().await {
            Ok(depth) => alarmcast_prometheus::set_queue_depth(depth),
            Err(e) => debug!(error = %e, "queue depth unavailable"),
        }
    }

    async fn handle(&self, message: &QueueMessage) -> Result<(), AlarmcastError> {
        let disposition = match serde_json::from_str::<Alarm>(&message.payload) {
            Ok(alarm) => match self.processor.process(&alarm).await {
                Ok(ProcessOutcome::Duplicate { .. }) => {
                    self.queue.ack(message.id).await?;
                    Disposition::Acked
                }
                Ok(ProcessOutcome::Processed(report)) => {
                    if !report.is_complete() {
                        debug!(
                            message_id = message.id,
                            alarm_id = %report.alarm_id,
                            "failed channels were dead-lettered individually"
                        );
                    }
                    self.queue.ack(message.id).await?;
                    Disposition::Acked
                }
                Err(e) => self.settle_failure(message, &alarm.id, e.classify()).await?,
            },
            Err(e) => {
                let alarm_id = alarm_id_hint(&message.payload);
                let error = ClassifiedError::validation(format!("malformed alarm: {e}"), None);
                self.dead_letter(message, &alarm_id, &error).await?
            }
        };
        alarmcast_prometheus::record_queue_outcome(disposition.label());
        Ok(())
    }

    async fn settle_failure(
        &self,
        message: &QueueMessage,
        alarm_id: &str,
        error: ClassifiedError,
    ) -> Result<Disposition, AlarmcastError> {
        let attempt = message.attempts + 1;
        if error.is_retryable() && attempt < self.config.max_message_attempts {
            let delay = self
                .nack_policy
                .delay_with_hint(attempt, error.retry_after());
            warn!(
                message_id = message.id,
                alarm_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "alarm processing failed, redelivering later"
            );
            self.queue.nack(message.id, delay).await?;
            return Ok(Disposition::Nacked);
        }
        self.dead_letter(message, alarm_id, &error).await
    }

    async fn dead_letter(
        &self,
        message: &QueueMessage,
        alarm_id: &str,
        error: &ClassifiedError,
    ) -> Result<Disposition, AlarmcastError> {
        let id = self
            .dead_letters
            .push_dead_letter(alarm_id, None, &message.payload, error, message.attempts + 1)
            .await?;
        self.queue.dead_letter(message.id).await?;
        alarmcast_prometheus::record_dead_letter("all");
        warn!(
            message_id = message.id,
            dead_letter_id = id,
            alarm_id,
            category = error.category(),
            "message moved to dead letters"
        );
        Ok(Disposition::DeadLettered)
    }
}

/// Best-effort alarm id from a payload that did not parse as an alarm.
fn alarm_id_hint(payload: &str) -> String {
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str().map(str::to_string)))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarmcast_config::model::ProcessorConfig;
    use alarmcast_core::{classify, Channel, ProviderFailure};
    use alarmcast_test_utils::{alarm, contact, MemoryQueue, MemoryStore, MessageState, ScriptedSender, Step};

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        sms: Arc<ScriptedSender>,
        consumer: QueueConsumer,
    }

    fn fixture(sms: ScriptedSender, config: QueueConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.add_contact(contact("c1"));
        let queue = Arc::new(MemoryQueue::new());
        let sms = Arc::new(sms);
        let processor = AlarmProcessor::builder(
            store.clone(),
            store.clone(),
            store.clone(),
            ProcessorConfig::default(),
        )
        .channel(sms.clone(), 5, 1)
        .build();
        let consumer = QueueConsumer::new(
            queue.clone(),
            Arc::new(processor),
            store.clone(),
            store.clone(),
            config,
        );
        Fixture {
            store,
            queue,
            sms,
            consumer,
        }
    }

    fn sms_alarm(id: &str) -> String {
        let mut a = alarm(id);
        a.is_email = false;
        serde_json::to_string(&a).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn processed_messages_are_acked() {
        let f = fixture(ScriptedSender::new(Channel::Sms), QueueConfig::default());
        let id = f.queue.publish(&sms_alarm("a-1")).await.unwrap();

        assert_eq!(f.consumer.poll_once().await.unwrap(), PollResult::Handled(1));
        assert_eq!(f.queue.state(id), Some(MessageState::Acked));
        assert_eq!(f.sms.call_count(), 1);
        assert_eq!(f.consumer.poll_once().await.unwrap(), PollResult::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_are_acked_without_sending() {
        let f = fixture(ScriptedSender::new(Channel::Sms), QueueConfig::default());
        f.queue.publish(&sms_alarm("a-1")).await.unwrap();
        f.consumer.poll_once().await.unwrap();

        let dup = f.queue.publish(&sms_alarm("a-2")).await.unwrap();
        f.consumer.poll_once().await.unwrap();
        assert_eq!(f.queue.state(dup), Some(MessageState::Acked));
        assert_eq!(f.sms.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_alarm_is_dead_lettered_whole() {
        let f = fixture(ScriptedSender::new(Channel::Sms), QueueConfig::default());
        let mut a = alarm("a-1");
        a.latitude = 123.0;
        let id = f.queue.publish(&serde_json::to_string(&a).unwrap()).await.unwrap();

        f.consumer.poll_once().await.unwrap();
        assert_eq!(f.queue.state(id), Some(MessageState::DeadLettered));
        assert_eq!(f.store.dead_letters()[0].last_error.category, "validation");
        assert_eq!(f.sms.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_are_nacked_until_the_budget_is_spent() {
        let config = QueueConfig {
            max_message_attempts: 2,
            ..QueueConfig::default()
        };
        let f = fixture(ScriptedSender::new(Channel::Sms), config);
        let id = f.queue.publish(&sms_alarm("a-1")).await.unwrap();
        let retryable = AlarmcastError::Internal("store unavailable".into()).classify();

        let msg = f.queue.fetch(1).await.unwrap().remove(0);
        let first = f.consumer.settle_failure(&msg, "a-1", retryable.clone()).await.unwrap();
        assert_eq!(first, Disposition::Nacked);
        assert_eq!(f.queue.state(id), Some(MessageState::Pending));
        assert!(f.queue.fetch(1).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_millis(1_250)).await;
        let msg = f.queue.fetch(1).await.unwrap().remove(0);
        assert_eq!(msg.attempts, 1);
        let second = f.consumer.settle_failure(&msg, "a-1", retryable).await.unwrap();
        assert_eq!(second, Disposition::DeadLettered);
        assert_eq!(f.queue.state(id), Some(MessageState::DeadLettered));
        assert_eq!(f.store.dead_letters()[0].attempts, 2);
    }

    /// Reports running on the first check and paused afterwards.
    #[derive(Default)]
    struct PausesAfterFirstCheck(std::sync::atomic::AtomicU32);

    #[async_trait::async_trait]
    impl alarmcast_core::PluginAdapter for PausesAfterFirstCheck {
        fn name(&self) -> &str {
            "pause-race"
        }

        async fn health_check(&self) -> Result<alarmcast_core::HealthStatus, AlarmcastError> {
            Ok(alarmcast_core::HealthStatus::Healthy)
        }
    }

    #[async_trait::async_trait]
    impl ControlState for PausesAfterFirstCheck {
        async fn is_paused(&self) -> Result<bool, AlarmcastError> {
            Ok(self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst) > 0)
        }

        async fn is_mock(&self, _channel: Channel) -> Result<bool, AlarmcastError> {
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pause_after_fetch_requeues_the_batch() {
        let f = fixture(ScriptedSender::new(Channel::Sms), QueueConfig::default());
        let first = f.queue.publish(&sms_alarm("a-1")).await.unwrap();
        f.queue.publish(&sms_alarm("a-2")).await.unwrap();
        let processor = AlarmProcessor::builder(
            f.store.clone(),
            f.store.clone(),
            f.store.clone(),
            ProcessorConfig::default(),
        )
        .channel(f.sms.clone(), 5, 1)
        .build();
        let consumer = QueueConsumer::new(
            f.queue.clone(),
            Arc::new(processor),
            Arc::new(PausesAfterFirstCheck::default()),
            f.store.clone(),
            QueueConfig::default(),
        );

        assert_eq!(consumer.poll_once().await.unwrap(), PollResult::Requeued(2));
        assert_eq!(f.queue.state(first), Some(MessageState::Pending));
        assert_eq!(f.queue.attempts(first), Some(0));
        assert_eq!(f.queue.requeue_count(), 2);
        assert_eq!(f.sms.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let f = fixture(ScriptedSender::new(Channel::Sms), QueueConfig::default());
        f.queue.publish(&sms_alarm("a-1")).await.unwrap();
        let shutdown = CancellationToken::new();
        let consumer = Arc::new(f.consumer);

        let task = tokio::spawn({
            let consumer = consumer.clone();
            let shutdown = shutdown.clone();
            async move { consumer.run(shutdown).await }
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(f.sms.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_consumer_fetches_nothing() {
        let f = fixture(ScriptedSender::new(Channel::Sms), QueueConfig::default());
        let id = f.queue.publish(&sms_alarm("a-1")).await.unwrap();
        f.store.set_paused(true);

        assert_eq!(f.consumer.poll_once().await.unwrap(), PollResult::Paused);
        assert_eq!(f.queue.state(id), Some(MessageState::Pending));
        assert_eq!(f.sms.call_count(), 0);

        f.store.set_paused(false);
        assert_eq!(f.consumer.poll_once().await.unwrap(), PollResult::Handled(1));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_is_dead_lettered() {
        let f = fixture(ScriptedSender::new(Channel::Sms), QueueConfig::default());
        let id = f.queue.publish(r#"{"id":"a-9","imei":42}"#).await.unwrap();

        f.consumer.poll_once().await.unwrap();
        assert_eq!(f.queue.state(id), Some(MessageState::DeadLettered));
        let dlq = f.store.dead_letters();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].alarm_id, "a-9");
        assert_eq!(dlq[0].channel, None);
        assert_eq!(dlq[0].last_error.category, "validation");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_channel_is_acked_and_dead_lettered_per_channel() {
        let err = classify(ProviderFailure::http(400, None, "bad number"));
        let f = fixture(
            ScriptedSender::new(Channel::Sms).then(Step::Reject(err)),
            QueueConfig::default(),
        );
        let id = f.queue.publish(&sms_alarm("a-1")).await.unwrap();

        f.consumer.poll_once().await.unwrap();
        assert_eq!(f.queue.state(id), Some(MessageState::Acked));
        let dlq = f.store.dead_letters();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].channel, Some(Channel::Sms));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_copies_in_one_batch_send_once() {
        let f = fixture(
            ScriptedSender::new(Channel::Sms).with_latency(Duration::from_millis(100)),
            QueueConfig::default(),
        );
        let first = f.queue.publish(&sms_alarm("a-1")).await.unwrap();
        let second = f.queue.publish(&sms_alarm("a-1")).await.unwrap();

        assert_eq!(f.consumer.poll_once().await.unwrap(), PollResult::Handled(2));
        assert_eq!(f.queue.state(first), Some(MessageState::Acked));
        assert_eq!(f.queue.state(second), Some(MessageState::Acked));
        assert_eq!(f.sms.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_alarm_does_not_hold_back_the_next_message() {
        let store = Arc::new(MemoryStore::new());
        store.add_contact(contact("c1"));
        let queue = Arc::new(MemoryQueue::new());
        let unavailable = classify(ProviderFailure::http(503, None, "unavailable"));
        let sms = Arc::new(ScriptedSender::new(Channel::Sms).then(Step::Reject(unavailable)));
        let config = ProcessorConfig {
            retry_base_delay_ms: 10_000,
            ..ProcessorConfig::default()
        };
        let processor = AlarmProcessor::builder(store.clone(), store.clone(), store.clone(), config)
            .channel(sms.clone(), 5, 3)
            .build();
        let consumer = Arc::new(QueueConsumer::new(
            queue.clone(),
            Arc::new(processor),
            store.clone(),
            store.clone(),
            QueueConfig::default(),
        ));

        let slow = queue.publish(&sms_alarm("a-1")).await.unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(consumer.clone().run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut next = alarm("a-2");
        next.status = "overspeed".into();
        next.is_email = false;
        let fast = queue.publish(&serde_json::to_string(&next).unwrap()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(queue.state(fast), Some(MessageState::Acked));
        assert_ne!(queue.state(slow), Some(MessageState::Acked));

        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(queue.state(slow), Some(MessageState::Acked));
        assert_eq!(sms.call_count(), 3);
    }

    #[test]
    fn alarm_id_hint_reads_id_field() {
        assert_eq!(alarm_id_hint(r#"{"id":"x"}"#), "x");
        assert_eq!(alarm_id_hint("not json"), "");
    }
}
