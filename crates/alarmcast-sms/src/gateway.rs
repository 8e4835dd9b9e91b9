// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP API of the SMS modems.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use alarmcast_core::{
    classify, classify_response, AlarmcastError, ClassifiedError, Modem, ProviderFailure,
};

/// Sends one text message through one modem.
#[async_trait]
pub trait ModemGateway: Send + Sync + 'static {
    /// Returns the provider message id.
    async fn send_sms(&self, modem: &Modem, to: &str, text: &str)
    -> Result<String, ClassifiedError>;
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: String,
}

/// Modem gateway speaking the modems' JSON API: `POST {host}/api/sms/send`.
#[derive(Debug, Clone)]
pub struct HttpModemGateway {
    client: reqwest::Client,
}

impl HttpModemGateway {
    pub fn new(timeout: Duration) -> Result<Self, AlarmcastError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlarmcastError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ModemGateway for HttpModemGateway {
    async fn send_sms(
        &self,
        modem: &Modem,
        to: &str,
        text: &str,
    ) -> Result<String, ClassifiedError> {
        let url = format!("{}/api/sms/send", modem.host.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&SendRequest { to, text });
        if let Some(user) = &modem.username {
            request = request.basic_auth(user, modem.password.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify(ProviderFailure::from(e)).with_endpoint(&modem.id))?;
        let status = response.status();
        debug!(modem = %modem.id, status = %status, "modem responded");

        if !status.is_success() {
            return Err(classify_response(response).await.with_endpoint(&modem.id));
        }

        let parsed: SendResponse = response.json().await.map_err(|e| {
            classify(ProviderFailure::Other(format!("unreadable modem response: {e}")))
                .with_endpoint(&modem.id)
        })?;
        Ok(parsed.message_id)
    }
}
