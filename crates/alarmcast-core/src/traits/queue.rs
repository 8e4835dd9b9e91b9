// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Consumer contract of the alarm message broker.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AlarmcastError;
use crate::traits::adapter::PluginAdapter;

/// A message leased from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: i64,
    pub payload: String,
    /// Failed processing attempts so far.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// At-least-once alarm queue.
///
/// Fetched messages are leased until acked, nacked, requeued, or
/// dead-lettered. Leases that expire are returned to the queue by
/// [`release_expired`](AlarmQueue::release_expired).
#[async_trait]
pub trait AlarmQueue: PluginAdapter {
    /// Publish a raw JSON payload. Returns the message id.
    async fn publish(&self, payload: &str) -> Result<i64, AlarmcastError>;

    /// Lease up to `limit` available messages, oldest first.
    async fn fetch(&self, limit: usize) -> Result<Vec<QueueMessage>, AlarmcastError>;

    /// Processing succeeded; the message is done.
    async fn ack(&self, id: i64) -> Result<(), AlarmcastError>;

    /// Processing failed; redeliver after `delay` with the attempt counted.
    async fn nack(&self, id: i64, delay: Duration) -> Result<(), AlarmcastError>;

    /// Return the message unprocessed; the attempt is not counted.
    async fn requeue(&self, id: i64) -> Result<(), AlarmcastError>;

    /// The message moved to the dead-letter store; never redeliver.
    async fn dead_letter(&self, id: i64) -> Result<(), AlarmcastError>;

    /// Return messages whose lease expired. Returns how many were released.
    async fn release_expired(&self) -> Result<u64, AlarmcastError>;

    /// Messages waiting to be processed.
    async fn depth(&self) -> Result<u64, AlarmcastError>;
}
