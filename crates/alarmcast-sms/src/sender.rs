// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SMS [`ChannelSender`] backed by the modem pool.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use alarmcast_core::message::short_text;
use alarmcast_core::{
    Alarm, AlarmcastError, Channel, ChannelSender, ClassifiedError, Contact,
    DeliveryAttemptResult, HealthStatus, PluginAdapter, RecipientOutcome,
};

use crate::pool::ModemPool;

pub const PROVIDER: &str = "modem-pool";

/// Sends one SMS per recipient, each through its own modem selection.
#[derive(Debug)]
pub struct SmsSender {
    pool: Arc<ModemPool>,
}

impl SmsSender {
    pub fn new(pool: Arc<ModemPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ModemPool> {
        &self.pool
    }
}

#[async_trait]
impl PluginAdapter for SmsSender {
    fn name(&self) -> &str {
        "sms"
    }

    async fn health_check(&self) -> Result<HealthStatus, AlarmcastError> {
        Ok(match self.pool.usable_count() {
            0 => HealthStatus::Unhealthy("no usable modem".into()),
            n => {
                let total = self.pool.snapshot().len();
                if n < total {
                    HealthStatus::Degraded(format!("{n} of {total} modems usable"))
                } else {
                    HealthStatus::Healthy
                }
            }
        })
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn send(
        &self,
        alarm: &Alarm,
        recipients: &[Contact],
    ) -> Result<DeliveryAttemptResult, ClassifiedError> {
        let numbers: Vec<&str> = recipients
            .iter()
            .filter_map(|c| c.address_for(Channel::Sms))
            .collect();
        if numbers.is_empty() {
            return Err(ClassifiedError::validation(
                "no recipient has a phone number",
                Some("phone".into()),
            ));
        }

        let text = short_text(alarm);
        let outcomes = join_all(numbers.into_iter().map(|to| {
            let text = &text;
            async move {
                match self.pool.send(&alarm.imei, to, text).await {
                    Ok(receipt) => {
                        debug!(alarm_id = %alarm.id, to, modem = %receipt.modem_id, "sms sent");
                        RecipientOutcome::delivered(to, Some(receipt.message_id))
                            .with_modem(receipt.modem_id)
                    }
                    Err(e) => RecipientOutcome::failed(to, e),
                }
            }
        }))
        .await;

        Ok(DeliveryAttemptResult::from_outcomes(
            Channel::Sms,
            PROVIDER,
            outcomes,
        ))
    }
}
