// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Email [`ChannelSender`].

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::Message;
use tracing::{debug, warn};

use alarmcast_core::message::{body, subject};
use alarmcast_core::{
    Alarm, AlarmcastError, Channel, ChannelSender, ClassifiedError, Contact,
    DeliveryAttemptResult, HealthStatus, PluginAdapter, RecipientOutcome,
};
use alarmcast_resilience::CircuitBreaker;

use crate::transport::MailTransport;

pub const PROVIDER: &str = "smtp";

/// Sends one message per recipient through a shared SMTP relay.
///
/// Every call goes through the relay's breaker (`email:<host>`). Once the
/// breaker rejects, the remaining recipients fail with the same rejection
/// without contacting the relay.
pub struct EmailSender {
    transport: Arc<dyn MailTransport>,
    breaker: Arc<CircuitBreaker>,
    from: Mailbox,
}

impl std::fmt::Debug for EmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSender")
            .field("from", &self.from.to_string())
            .field("breaker", &self.breaker.name())
            .finish_non_exhaustive()
    }
}

impl EmailSender {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        breaker: Arc<CircuitBreaker>,
        from: &str,
    ) -> Result<Self, AlarmcastError> {
        let from = from
            .parse::<Mailbox>()
            .map_err(|e| AlarmcastError::Config(format!("invalid email.from `{from}`: {e}")))?;
        Ok(Self {
            transport,
            breaker,
            from,
        })
    }

    fn build(&self, to: &str, alarm: &Alarm) -> Result<Message, ClassifiedError> {
        let to = to.parse::<Mailbox>().map_err(|e| {
            ClassifiedError::validation(format!("invalid address `{to}`: {e}"), Some("email".into()))
        })?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject(alarm))
            .header(ContentType::TEXT_PLAIN)
            .body(body(alarm))
            .map_err(|e| ClassifiedError::validation(format!("cannot build message: {e}"), None))
    }
}

#[async_trait]
impl PluginAdapter for EmailSender {
    fn name(&self) -> &str {
        "email"
    }

    async fn health_check(&self) -> Result<HealthStatus, AlarmcastError> {
        if !self.breaker.is_available() {
            return Ok(HealthStatus::Unhealthy(format!(
                "circuit {} is open",
                self.breaker.name()
            )));
        }
        Ok(match self.transport.ping().await {
            Ok(true) => HealthStatus::Healthy,
            Ok(false) => HealthStatus::Degraded("relay did not answer NOOP".into()),
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        })
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn send(
        &self,
        alarm: &Alarm,
        recipients: &[Contact],
    ) -> Result<DeliveryAttemptResult, ClassifiedError> {
        let addresses: Vec<&str> = recipients
            .iter()
            .filter_map(|c| c.address_for(Channel::Email))
            .collect();
        if addresses.is_empty() {
            return Err(ClassifiedError::validation(
                "no recipient has an email address",
                Some("email".into()),
            ));
        }

        let mut outcomes = Vec::with_capacity(addresses.len());
        let mut rejected: Option<ClassifiedError> = None;
        for to in addresses {
            if let Some(e) = &rejected {
                outcomes.push(RecipientOutcome::failed(to, e.clone()));
                continue;
            }
            let message = match self.build(to, alarm) {
                Ok(m) => m,
                Err(e) => {
                    outcomes.push(RecipientOutcome::failed(to, e));
                    continue;
                }
            };
            match self.breaker.execute(|| self.transport.deliver(message)).await {
                Ok(id) => {
                    debug!(alarm_id = %alarm.id, to, "email accepted");
                    outcomes.push(RecipientOutcome::delivered(to, Some(id)));
                }
                Err(e) => {
                    warn!(alarm_id = %alarm.id, to, error = %e, "email failed");
                    if e.is_circuit_rejection() {
                        rejected = Some(e.clone());
                    }
                    outcomes.push(RecipientOutcome::failed(to, e));
                }
            }
        }

        // Nothing reached the relay: a channel-level failure.
        if let Some(e) = rejected {
            let all_rejected = outcomes
                .iter()
                .all(|o| o.error.as_ref().is_some_and(ClassifiedError::is_circuit_rejection));
            if all_rejected {
                return Err(e);
            }
        }
        Ok(DeliveryAttemptResult::from_outcomes(
            Channel::Email,
            PROVIDER,
            outcomes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use alarmcast_core::{classify, ProviderFailure};
    use alarmcast_resilience::CircuitBreakerConfig;
    use alarmcast_test_utils::{alarm, contact};

    /// Records envelopes; fails for addresses listed in `fail`.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
        fail: Vec<(&'static str, ClassifiedError)>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn deliver(&self, message: Message) -> Result<String, ClassifiedError> {
            let to = message.envelope().to()[0].to_string();
            if let Some((_, e)) = self.fail.iter().find(|(addr, _)| *addr == to) {
                return Err(e.clone());
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(to);
            Ok(format!("2.0.0 queued as {}", sent.len()))
        }

        async fn ping(&self) -> Result<bool, ClassifiedError> {
            Ok(true)
        }
    }

    fn sender(transport: RecordingTransport, threshold: u32) -> (EmailSender, Arc<RecordingTransport>) {
        let transport = Arc::new(transport);
        let breaker = Arc::new(CircuitBreaker::new(
            "email:smtp.test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout: Duration::from_secs(60),
                ..CircuitBreakerConfig::default()
            },
        ));
        let s = EmailSender::new(
            Arc::clone(&transport) as Arc<dyn MailTransport>,
            breaker,
            "Alarms <alarms@example.com>",
        )
        .unwrap();
        (s, transport)
    }

    #[tokio::test]
    async fn one_message_per_recipient() {
        let (s, transport) = sender(RecordingTransport::default(), 5);
        let result = s
            .send(&alarm("a-1"), &[contact("c1"), contact("c2")])
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec!["c1@example.com", "c2@example.com"]
        );
        assert_eq!(
            result.outcomes[1].provider_message_id.as_deref(),
            Some("2.0.0 queued as 2")
        );
    }

    #[tokio::test]
    async fn invalid_address_fails_only_that_recipient() {
        let (s, _) = sender(RecordingTransport::default(), 5);
        let mut bad = contact("c2");
        bad.email = Some("not an address".into());
        let result = s.send(&alarm("a-1"), &[contact("c1"), bad]).await.unwrap();
        assert!(!result.success);
        assert!(result.outcomes[0].success);
        let err = result.outcomes[1].error.as_ref().unwrap();
        assert_eq!(err.category(), "validation");
    }

    #[tokio::test]
    async fn open_breaker_fails_whole_channel() {
        let outage = classify(ProviderFailure::Network {
            code: "ECONNREFUSED".into(),
            message: "refused".into(),
        });
        let transport = RecordingTransport {
            fail: vec![("c1@example.com", outage)],
            ..Default::default()
        };
        let (s, transport) = sender(transport, 1);

        // c1 trips the breaker; c2 and c3 are rejected without a call.
        let result = s
            .send(&alarm("a-1"), &[contact("c1"), contact("c2"), contact("c3")])
            .await
            .unwrap();
        assert_eq!(result.outcomes[0].error.as_ref().unwrap().category(), "connection_refused");
        assert_eq!(result.outcomes[2].error.as_ref().unwrap().category(), "circuit_open");
        assert!(transport.sent.lock().unwrap().is_empty());

        let err = s.send(&alarm("a-2"), &[contact("c2")]).await.unwrap_err();
        assert_eq!(err.category(), "circuit_open");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn contacts_without_email_are_rejected() {
        let (s, _) = sender(RecordingTransport::default(), 5);
        let mut c = contact("c1");
        c.email = None;
        assert!(s.send(&alarm("a-1"), &[c]).await.is_err());
    }
}
