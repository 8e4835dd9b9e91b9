// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-channel concurrency limits.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use alarmcast_core::{AlarmcastError, Channel};

/// One FIFO-fair semaphore per channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelLimiters {
    limits: HashMap<Channel, (usize, Arc<Semaphore>)>,
}

impl ChannelLimiters {
    pub fn new(limits: impl IntoIterator<Item = (Channel, usize)>) -> Self {
        Self {
            limits: limits
                .into_iter()
                .map(|(channel, n)| {
                    let n = n.max(1);
                    (channel, (n, Arc::new(Semaphore::new(n))))
                })
                .collect(),
        }
    }

    /// Wait for a slot on `channel`. Channels without a limit return `None`.
    pub async fn acquire(
        &self,
        channel: Channel,
    ) -> Result<Option<OwnedSemaphorePermit>, AlarmcastError> {
        let Some((_, sem)) = self.limits.get(&channel) else {
            return Ok(None);
        };
        Arc::clone(sem)
            .acquire_owned()
            .await
            .map(Some)
            .map_err(|_| AlarmcastError::Internal(format!("{channel} limiter closed")))
    }

    /// Free slots on `channel`, if it is limited.
    pub fn available(&self, channel: Channel) -> Option<usize> {
        self.limits.get(&channel).map(|(_, s)| s.available_permits())
    }

    pub fn limit(&self, channel: Channel) -> Option<usize> {
        self.limits.get(&channel).map(|(n, _)| *n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounds_concurrent_sends() {
        let limiters = ChannelLimiters::new([(Channel::Sms, 2)]);
        let a = limiters.acquire(Channel::Sms).await.unwrap();
        let _b = limiters.acquire(Channel::Sms).await.unwrap();
        assert_eq!(limiters.available(Channel::Sms), Some(0));

        let waiting = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            limiters.acquire(Channel::Sms),
        )
        .await;
        assert!(waiting.is_err());

        drop(a);
        assert_eq!(limiters.available(Channel::Sms), Some(1));
    }

    #[tokio::test]
    async fn unlimited_channels_pass_through() {
        let limiters = ChannelLimiters::new([(Channel::Sms, 1)]);
        assert!(limiters.acquire(Channel::Push).await.unwrap().is_none());
        assert_eq!(limiters.limit(Channel::Push), None);
        assert_eq!(limiters.limit(Channel::Sms), Some(1));
    }
}
