// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Voice call channel for the alarmcast delivery engine.
//!
//! Places one text-to-speech call per recipient phone number through an
//! HTTP call provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use alarmcast_config::model::HttpChannelConfig;
use alarmcast_core::message::short_text;
use alarmcast_core::{
    classify, classify_response, Alarm, AlarmcastError, Channel, ChannelSender, ClassifiedError,
    Contact, DeliveryAttemptResult, HealthStatus, PluginAdapter, ProviderFailure,
    RecipientOutcome,
};
use alarmcast_resilience::{BreakerRegistry, CircuitBreaker, CircuitState};

#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    to: &'a str,
    message: &'a str,
    alarm_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    id: String,
}

/// Breaker name for a voice provider.
pub fn breaker_name(provider: &str) -> String {
    format!("voice:{provider}")
}

/// Voice [`ChannelSender`] backed by a JSON call API.
#[derive(Debug)]
pub struct VoiceSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    provider: String,
    breaker: Arc<CircuitBreaker>,
}

impl VoiceSender {
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
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| AlarmcastError::Config("voice.endpoint is required".into()))?;
        Self::new(
            endpoint,
            config.api_key.clone(),
            config.provider.clone(),
            Duration::from_secs(config.timeout_secs),
            breakers,
        )
    }

    async fn call(&self, to: &str, message: &str, alarm_id: &str) -> Result<String, ClassifiedError> {
        let mut request = self.client.post(&self.endpoint).json(&CallRequest {
            to,
            message,
            alarm_id,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| classify(ProviderFailure::from(e)).with_endpoint(&self.provider))?;
        if !response.status().is_success() {
            return Err(classify_response(response).await.with_endpoint(&self.provider));
        }
        let parsed: CallResponse = response.json().await.map_err(|e| {
            classify(ProviderFailure::Other(format!("unreadable call response: {e}")))
                .with_endpoint(&self.provider)
        })?;
        Ok(parsed.id)
    }
}

#[async_trait]
impl PluginAdapter for VoiceSender {
    fn name(&self) -> &str {
        "voice"
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
impl ChannelSender for VoiceSender {
    fn channel(&self) -> Channel {
        Channel::Voice
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    async fn send(
        &self,
        alarm: &Alarm,
        recipients: &[Contact],
    ) -> Result<DeliveryAttemptResult, ClassifiedError> {
        let numbers: Vec<&str> = recipients
            .iter()
            .filter_map(|c| c.address_for(Channel::Voice))
            .collect();
        if numbers.is_empty() {
            return Err(ClassifiedError::validation(
                "no recipient has a phone number",
                Some("phone".into()),
            ));
        }

        let text = short_text(alarm);
        let calls = numbers.iter().map(|to| {
            let text = text.as_str();
            async move {
                match self.breaker.execute(|| self.call(to, text, &alarm.id)).await {
                    Ok(id) => {
                        debug!(alarm_id = %alarm.id, to, call_id = %id, "call placed");
                        RecipientOutcome::delivered(*to, Some(id))
                    }
                    Err(e) => {
                        warn!(alarm_id = %alarm.id, to, error = %e, "call failed");
                        RecipientOutcome::failed(*to, e)
                    }
                }
            }
        });
        let outcomes = join_all(calls).await;

        let rejection = outcomes
            .iter()
            .map(|o| o.error.as_ref())
            .collect::<Option<Vec<_>>>()
            .filter(|errors| errors.iter().all(|e| e.is_circuit_rejection()))
            .and_then(|errors| errors.first().map(|e| (*e).clone()));
        if let Some(e) = rejection {
            return Err(e);
        }
        Ok(DeliveryAttemptResult::from_outcomes(
            Channel::Voice,
            &self.provider,
            outcomes,
        ))
    }
}
