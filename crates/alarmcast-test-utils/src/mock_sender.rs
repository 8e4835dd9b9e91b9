// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel sender that replays scripted outcomes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use alarmcast_core::{
    Alarm, AlarmcastError, Channel, ChannelSender, ClassifiedError, Contact,
    DeliveryAttemptResult, HealthStatus, PluginAdapter, RecipientOutcome,
};

/// Outcome of one scripted `send` call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Every recipient is delivered.
    Deliver,
    /// Every recipient fails with this error.
    Fail(ClassifiedError),
    /// The whole call fails with this error.
    Reject(ClassifiedError),
    /// The call succeeds but reports no recipient outcomes.
    Silent,
}

/// One recorded `send` call.
#[derive(Debug, Clone)]
pub struct SendCall {
    pub alarm_id: String,
    pub recipients: Vec<String>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct State {
    script: VecDeque<Step>,
    calls: Vec<SendCall>,
}

/// A mock [`ChannelSender`] for processor and end-to-end tests.
///
/// Steps are consumed one per call; once the script is exhausted every call
/// delivers. Recipients registered with [`fail_recipient`](Self::fail_recipient)
/// fail on every call regardless of the script.
#[derive(Debug)]
pub struct ScriptedSender {
    channel: Channel,
    provider: String,
    state: Mutex<State>,
    always_fail: HashMap<String, ClassifiedError>,
    latency: Duration,
}

impl ScriptedSender {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            provider: format!("scripted-{channel}"),
            state: Mutex::new(State::default()),
            always_fail: HashMap::new(),
            latency: Duration::ZERO,
        }
    }

    /// Make every call take `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Append a step to the script.
    pub fn then(self, step: Step) -> Self {
        self.lock().script.push_back(step);
        self
    }

    pub fn fail_recipient(mut self, recipient: impl Into<String>, error: ClassifiedError) -> Self {
        self.always_fail.insert(recipient.into(), error);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<SendCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }
}

#[async_trait]
impl PluginAdapter for ScriptedSender {
    fn name(&self) -> &str {
        &self.provider
    }

    async fn health_check(&self) -> Result<HealthStatus, AlarmcastError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    async fn send(
        &self,
        alarm: &Alarm,
        recipients: &[Contact],
    ) -> Result<DeliveryAttemptResult, ClassifiedError> {
        let addresses: Vec<String> = recipients
            .iter()
            .filter_map(|c| c.address_for(self.channel))
            .map(str::to_string)
            .collect();
        let step = {
            let mut state = self.lock();
            state.calls.push(SendCall {
                alarm_id: alarm.id.clone(),
                recipients: addresses.clone(),
                at: Instant::now(),
            });
            state.script.pop_front().unwrap_or(Step::Deliver)
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if addresses.is_empty() {
            return Err(ClassifiedError::validation(
                format!("no recipient reachable by {}", self.channel),
                None,
            ));
        }

        match &step {
            Step::Reject(e) => return Err(e.clone()),
            Step::Silent => {
                return Ok(DeliveryAttemptResult::from_outcomes(
                    self.channel,
                    &self.provider,
                    Vec::new(),
                ));
            }
            Step::Deliver | Step::Fail(_) => {}
        }

        let outcomes = addresses
            .into_iter()
            .map(|to| {
                if let Some(e) = self.always_fail.get(&to) {
                    return RecipientOutcome::failed(to, e.clone());
                }
                match &step {
                    Step::Deliver | Step::Silent => {
                        let id = format!("{}-{}", self.channel, alarm.id);
                        RecipientOutcome::delivered(to, Some(id))
                    }
                    Step::Fail(e) | Step::Reject(e) => RecipientOutcome::failed(to, e.clone()),
                }
            })
            .collect();
        Ok(DeliveryAttemptResult::from_outcomes(
            self.channel,
            &self.provider,
            outcomes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{alarm, contact};

    #[tokio::test]
    async fn script_then_default_delivery() {
        let err = ClassifiedError::configuration("down");
        let sender = ScriptedSender::new(Channel::Email)
            .then(Step::Reject(err.clone()))
            .then(Step::Fail(err));
        let a = alarm("a-1");
        let c = [contact("c1")];

        assert!(sender.send(&a, &c).await.is_err());
        assert!(!sender.send(&a, &c).await.unwrap().success);
        assert!(sender.send(&a, &c).await.unwrap().success);
        assert_eq!(sender.call_count(), 3);
        assert_eq!(sender.calls()[0].recipients, vec!["c1@example.com"]);
    }
}
