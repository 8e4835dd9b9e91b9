// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory [`AlarmQueue`] whose delays and leases run on tokio time.
//!
//! Under `#[tokio::test(start_paused = true)]` nack delays and lease expiry
//! advance with the mocked clock.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use alarmcast_core::{AlarmQueue, AlarmcastError, HealthStatus, PluginAdapter, QueueMessage};

/// Lifecycle of a message in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Pending,
    Leased,
    Acked,
    DeadLettered,
}

#[derive(Debug)]
struct Entry {
    payload: String,
    attempts: u32,
    enqueued_at: DateTime<Utc>,
    state: MessageState,
    available_at: Instant,
    lease_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    entries: BTreeMap<i64, Entry>,
    requeues: u32,
}

/// In-memory queue for tests.
#[derive(Debug)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    lock_timeout: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(300))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            lock_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(
        &self,
        id: i64,
        f: impl FnOnce(&mut Entry),
    ) -> Result<(), AlarmcastError> {
        match self.lock().entries.get_mut(&id) {
            Some(entry) => {
                f(entry);
                Ok(())
            }
            None => Err(AlarmcastError::Queue {
                message: format!("unknown message {id}"),
                source: None,
            }),
        }
    }

    pub fn state(&self, id: i64) -> Option<MessageState> {
        self.lock().entries.get(&id).map(|e| e.state)
    }

    pub fn attempts(&self, id: i64) -> Option<u32> {
        self.lock().entries.get(&id).map(|e| e.attempts)
    }

    /// Ids in `state`, ascending.
    pub fn ids_in(&self, state: MessageState) -> Vec<i64> {
        self.lock()
            .entries
            .iter()
            .filter(|(_, e)| e.state == state)
            .map(|(id, _)| *id)
            .collect()
    }

    /// How many times a message was returned with [`AlarmQueue::requeue`].
    pub fn requeue_count(&self) -> u32 {
        self.lock().requeues
    }
}

#[async_trait]
impl PluginAdapter for MemoryQueue {
    fn name(&self) -> &str {
        "memory-queue"
    }

    async fn health_check(&self) -> Result<HealthStatus, AlarmcastError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl AlarmQueue for MemoryQueue {
    async fn publish(&self, payload: &str) -> Result<i64, AlarmcastError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.insert(
            id,
            Entry {
                payload: payload.to_string(),
                attempts: 0,
                enqueued_at: Utc::now(),
                state: MessageState::Pending,
                available_at: Instant::now(),
                lease_until: None,
            },
        );
        Ok(id)
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<QueueMessage>, AlarmcastError> {
        let now = Instant::now();
        let lease_until = now + self.lock_timeout;
        let mut inner = self.lock();
        Ok(inner
            .entries
            .iter_mut()
            .filter(|(_, e)| e.state == MessageState::Pending && e.available_at <= now)
            .take(limit)
            .map(|(id, e)| {
                e.state = MessageState::Leased;
                e.lease_until = Some(lease_until);
                QueueMessage {
                    id: *id,
                    payload: e.payload.clone(),
                    attempts: e.attempts,
                    enqueued_at: e.enqueued_at,
                }
            })
            .collect())
    }

    async fn ack(&self, id: i64) -> Result<(), AlarmcastError> {
        self.update(id, |e| {
            e.state = MessageState::Acked;
            e.lease_until = None;
        })
    }

    async fn nack(&self, id: i64, delay: Duration) -> Result<(), AlarmcastError> {
        let available_at = Instant::now() + delay;
        self.update(id, |e| {
            e.state = MessageState::Pending;
            e.attempts += 1;
            e.available_at = available_at;
            e.lease_until = None;
        })
    }

    async fn requeue(&self, id: i64) -> Result<(), AlarmcastError> {
        self.update(id, |e| {
            e.state = MessageState::Pending;
            e.lease_until = None;
        })?;
        self.lock().requeues += 1;
        Ok(())
    }

    async fn dead_letter(&self, id: i64) -> Result<(), AlarmcastError> {
        self.update(id, |e| {
            e.state = MessageState::DeadLettered;
            e.lease_until = None;
        })
    }

    async fn release_expired(&self) -> Result<u64, AlarmcastError> {
        let now = Instant::now();
        let mut released = 0;
        for e in self.lock().entries.values_mut() {
            if e.state == MessageState::Leased && e.lease_until.is_some_and(|t| t < now) {
                e.state = MessageState::Pending;
                e.attempts += 1;
                e.available_at = now;
                e.lease_until = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn depth(&self) -> Result<u64, AlarmcastError> {
        Ok(self
            .lock()
            .entries
            .values()
            .filter(|e| matches!(e.state, MessageState::Pending | MessageState::Leased))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn nack_delays_redelivery() {
        let q = MemoryQueue::new();
        let id = q.publish("{}").await.unwrap();
        assert_eq!(q.fetch(10).await.unwrap().len(), 1);
        q.nack(id, Duration::from_secs(2)).await.unwrap();
        assert!(q.fetch(10).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        let again = q.fetch(10).await.unwrap();
        assert_eq!(again[0].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_released() {
        let q = MemoryQueue::with_lock_timeout(Duration::from_secs(5));
        let id = q.publish("{}").await.unwrap();
        q.fetch(1).await.unwrap();
        assert_eq!(q.release_expired().await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(q.release_expired().await.unwrap(), 1);
        assert_eq!(q.state(id), Some(MessageState::Pending));
        assert_eq!(q.depth().await.unwrap(), 1);
    }
}
