// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Push notification channel for the alarmcast delivery engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use alarmcast_config::model::HttpChannelConfig;
use alarmcast_core::message::{short_text, subject};
use alarmcast_core::{
    classify, classify_response, Alarm, AlarmcastError, Channel, ChannelSender, ClassifiedError,
    Contact, DeliveryAttemptResult, HealthStatus, PluginAdapter, ProviderFailure,
    RecipientOutcome,
};
use alarmcast_resilience::{BreakerRegistry, CircuitBreaker, CircuitState};

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    token: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a BTreeMap<&'static str, String>,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    id: String,
}

pub fn breaker_name(provider: &str) -> String {
    format!("push:{provider}")
}

/// Key/value payload delivered alongside the notification.
fn data(alarm: &Alarm) -> BTreeMap<&'static str, String> {
    let mut data = BTreeMap::from([
        ("alarm_id", alarm.id.clone()),
        ("imei", alarm.imei.clone()),
        ("status", alarm.status.clone()),
        ("latitude", alarm.latitude.to_string()),
        ("longitude", alarm.longitude.to_string()),
        ("gps_time", alarm.gps_time.to_rfc3339()),
    ]);
    if let Some(category) = &alarm.category {
        data.insert("category", category.clone());
    }
    data
}

/// Push [`ChannelSender`]: one notification per device token.
#[derive(Debug)]
pub struct PushSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    provider: String,
    breaker: Arc<CircuitBreaker>,
}

impl PushSender {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        provider: impl Into<String>,
        timeout: Duration,
        breakers: &BreakerRegistry,
    ) -> Result<Self, AlarmcastError> {
        let provider = provider.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlarmcastError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            breaker: breakers.get(&breaker_name(&provider)),
            provider,
        })
    }

    pub fn from_config(
        config: &HttpChannelConfig,
        breakers: &BreakerRegistry,
    ) -> Result<Self, AlarmcastError> {
        let Some(endpoint) = config.endpoint.clone() else {
            return Err(AlarmcastError::Config("push.endpoint is required".into()));
        };
        Self::new(
            endpoint,
            config.api_key.clone(),
            config.provider.clone(),
            Duration::from_secs(config.timeout_secs),
            breakers,
        )
    }

    async fn notify(&self, request: &PushRequest<'_>) -> Result<String, ClassifiedError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| classify(ProviderFailure::from(e)).with_endpoint(&self.provider))?;
        if !response.status().is_success() {
            return Err(classify_response(response).await.with_endpoint(&self.provider));
        }
        response
            .json::<PushResponse>()
            .await
            .map(|r| r.id)
            .map_err(|e| {
                classify(ProviderFailure::Other(format!("unreadable push response: {e}")))
                    .with_endpoint(&self.provider)
            })
    }
}

#[async_trait]
impl PluginAdapter for PushSender {
    fn name(&self) -> &str {
        "push"
    }

    async fn health_check(&self) -> Result<HealthStatus, AlarmcastError> {
        Ok(match self.breaker.state() {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded("provider recovering".into()),
            CircuitState::Open => {
                HealthStatus::Unhealthy(format!("circuit {} is open", self.breaker.name()))
            }
        })
    }
}

#[async_trait]
impl ChannelSender for PushSender {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    async fn send(
        &self,
        alarm: &Alarm,
        recipients: &[Contact],
    ) -> Result<DeliveryAttemptResult, ClassifiedError> {
        let tokens: Vec<&str> = recipients
            .iter()
            .filter_map(|c| c.address_for(Channel::Push))
            .collect();
        if tokens.is_empty() {
            return Err(ClassifiedError::validation(
                "no recipient has a push token",
                Some("push_token".into()),
            ));
        }

        let title = subject(alarm);
        let body = short_text(alarm);
        let data = data(alarm);
        let sends = tokens.iter().map(|&token| {
            let request = PushRequest {
                token,
                title: &title,
                body: &body,
                data: &data,
            };
            async move {
                match self.breaker.execute(|| self.notify(&request)).await {
                    Ok(id) => {
                        debug!(alarm_id = %alarm.id, push_id = %id, "push accepted");
                        RecipientOutcome::delivered(request.token, Some(id))
                    }
                    Err(e) => {
                        warn!(alarm_id = %alarm.id, error = %e, "push failed");
                        RecipientOutcome::failed(request.token, e)
                    }
                }
            }
        });
        let outcomes = join_all(sends).await;

        // Every token was turned away by the breaker.
        let all_rejected = outcomes
            .iter()
            .all(|o| o.error.as_ref().is_some_and(ClassifiedError::is_circuit_rejection));
        if let Some(e) = outcomes.first().and_then(|o| o.error.clone()).filter(|_| all_rejected) {
            return Err(e);
        }
        Ok(DeliveryAttemptResult::from_outcomes(
            Channel::Push,
            &self.provider,
            outcomes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarmcast_resilience::CircuitBreakerConfig;
    use alarmcast_test_utils::{alarm, contact};
    use wiremock::matchers::{bearer_token, body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn push(server: &MockServer, breakers: &BreakerRegistry) -> PushSender {
        PushSender::new(server.uri(), Some("k".into()), "fcm", Duration::from_secs(5), breakers)
            .unwrap()
    }

    #[tokio::test]
    async fn sends_title_body_and_alarm_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(bearer_token("k"))
            .and(body_partial_json(serde_json::json!({
                "token": "push-c1",
                "data": {"alarm_id": "a-1", "status": "sos"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "p-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let breakers = BreakerRegistry::default();
        let result = push(&server, &breakers)
            .send(&alarm("a-1"), &[contact("c1")])
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.outcomes[0].recipient, "push-c1");
    }

    #[tokio::test]
    async fn unregistered_token_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("token not registered"))
            .mount(&server)
            .await;

        let breakers = BreakerRegistry::default();
        let result = push(&server, &breakers)
            .send(&alarm("a-1"), &[contact("c1")])
            .await
            .unwrap();
        let err = result.outcomes[0].error.as_ref().unwrap();
        assert_eq!(err.category(), "not_found");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn open_breaker_rejects_before_calling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "p"})))
            .expect(0)
            .mount(&server)
            .await;

        let breakers = BreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        });
        let breaker = breakers.get("push:fcm");
        breaker
            .try_acquire()
            .unwrap()
            .failure(&ClassifiedError::configuration("down"));

        let err = push(&server, &breakers)
            .send(&alarm("a-1"), &[contact("c1"), contact("c2")])
            .await
            .unwrap_err();
        assert_eq!(err.category(), "circuit_open");
    }

    #[tokio::test]
    async fn contacts_without_tokens_are_rejected() {
        let mut c = contact("c1");
        c.push_token = None;
        let breakers = BreakerRegistry::default();
        let sender =
            PushSender::new("http://localhost:1", None, "fcm", Duration::from_secs(1), &breakers)
                .unwrap();
        assert!(sender.send(&alarm("a-1"), &[c]).await.is_err());
    }
}
