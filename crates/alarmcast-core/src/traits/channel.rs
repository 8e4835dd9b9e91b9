// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel sender trait for email, SMS, voice, and push providers.

use async_trait::async_trait;

use crate::error::ClassifiedError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{Alarm, Channel, Contact, DeliveryAttemptResult};

/// Delivers an alarm to recipients over one channel.
///
/// Implementations gate every provider call with a circuit breaker and
/// never swallow failures: per-recipient failures are reported in the
/// returned outcomes, and a send where no recipient could be reached is
/// returned as the classified error itself.
#[async_trait]
pub trait ChannelSender: PluginAdapter {
    /// The channel this sender serves.
    fn channel(&self) -> Channel;

    /// Provider name recorded on results (e.g. `smtp`, `modem-pool`).
    fn provider(&self) -> &str;

    /// Send `alarm` to every recipient in `recipients`.
    async fn send(
        &self,
        alarm: &Alarm,
        recipients: &[Contact],
    ) -> Result<DeliveryAttemptResult, ClassifiedError>;
}
