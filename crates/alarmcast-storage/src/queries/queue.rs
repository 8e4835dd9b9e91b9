// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue operations for crash-safe alarm processing.
//!
//! A fetched message is leased (`processing` with `locked_until`). If the
//! consumer dies, the lease expires and [`release_expired`] returns the
//! message to `pending` with the attempt counted.

use std::time::Duration;

use chrono::Utc;
use rusqlite::params;

use alarmcast_core::{AlarmcastError, QueueMessage};

use super::{fmt_ts, ts_col};
use crate::database::{map_tr_err, Database};

fn after(delay: Duration) -> String {
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    fmt_ts(Utc::now() + delay)
}

/// Enqueue a payload. Returns the message id.
pub async fn publish(db: &Database, payload: &str) -> Result<i64, AlarmcastError> {
    let payload = payload.to_string();
    let now = fmt_ts(Utc::now());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO queue (payload, status, attempts, available_at, created_at, updated_at)
                 VALUES (?1, 'pending', 0, ?2, ?2, ?2)",
                params![payload, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Lease up to `limit` available messages for `lock_timeout`, oldest first.
pub async fn fetch(
    db: &Database,
    limit: usize,
    lock_timeout: Duration,
) -> Result<Vec<QueueMessage>, AlarmcastError> {
    let now = fmt_ts(Utc::now());
    let locked_until = after(lock_timeout);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let messages = {
                let mut stmt = tx.prepare(
                    "SELECT id, payload, attempts, created_at FROM queue
                     WHERE status = 'pending' AND available_at <= ?1
                     ORDER BY id ASC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![now, limit as i64], |row| {
                    Ok(QueueMessage {
                        id: row.get(0)?,
                        payload: row.get(1)?,
                        attempts: row.get(2)?,
                        enqueued_at: ts_col(row, 3)?,
                    })
                })?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            for message in &messages {
                tx.execute(
                    "UPDATE queue SET status = 'processing', locked_until = ?2, updated_at = ?3
                     WHERE id = ?1",
                    params![message.id, locked_until, now],
                )?;
            }
            tx.commit()?;
            Ok(messages)
        })
        .await
        .map_err(map_tr_err)
}

async fn set_status(
    db: &Database,
    id: i64,
    status: &'static str,
) -> Result<(), AlarmcastError> {
    let now = fmt_ts(Utc::now());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE queue SET status = ?2, locked_until = NULL, updated_at = ?3 WHERE id = ?1",
                params![id, status, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn ack(db: &Database, id: i64) -> Result<(), AlarmcastError> {
    set_status(db, id, "completed").await
}

pub async fn dead_letter(db: &Database, id: i64) -> Result<(), AlarmcastError> {
    set_status(db, id, "dead_lettered").await
}

/// Return a message to `pending` after `delay`, counting the attempt.
pub async fn nack(db: &Database, id: i64, delay: Duration) -> Result<(), AlarmcastError> {
    let now = fmt_ts(Utc::now());
    let available_at = after(delay);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE queue SET status = 'pending', attempts = attempts + 1,
                     available_at = ?2, locked_until = NULL, updated_at = ?3
                 WHERE id = ?1",
                params![id, available_at, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Return a message to `pending` immediately without counting an attempt.
pub async fn requeue(db: &Database, id: i64) -> Result<(), AlarmcastError> {
    let now = fmt_ts(Utc::now());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE queue SET status = 'pending', available_at = ?2,
                     locked_until = NULL, updated_at = ?2
                 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Return leased messages whose lock expired to `pending`.
pub async fn release_expired(db: &Database) -> Result<u64, AlarmcastError> {
    let now = fmt_ts(Utc::now());
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE queue SET status = 'pending', attempts = attempts + 1,
                     locked_until = NULL, available_at = ?1, updated_at = ?1
                 WHERE status = 'processing' AND locked_until < ?1",
                params![now],
            )?;
            Ok(n as u64)
        })
        .await
        .map_err(map_tr_err)
}

/// Pending and in-flight messages.
pub async fn depth(db: &Database) -> Result<u64, AlarmcastError> {
    db.connection()
        .call(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM queue WHERE status IN ('pending', 'processing')",
                [],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Message counts per status, for `status` output.
pub async fn counts_by_status(db: &Database) -> Result<Vec<(String, u64)>, AlarmcastError> {
    db.connection()
        .call(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM queue GROUP BY status ORDER BY status")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Drop completed messages last updated before `before`.
pub async fn purge_completed(
    db: &Database,
    before: chrono::DateTime<Utc>,
) -> Result<u64, AlarmcastError> {
    let before = fmt_ts(before);
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM queue
                 WHERE status IN ('completed', 'dead_lettered') AND updated_at < ?1",
                params![before],
            )?;
            Ok(n as u64)
        })
        .await
        .map_err(map_tr_err)
}
