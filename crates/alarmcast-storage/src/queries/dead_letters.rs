// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dead-letter store: alarms (or single channels) that exhausted retries.

use chrono::{DateTime, Utc};
use rusqlite::params;
use rusqlite::types::Type;

use alarmcast_core::{AlarmcastError, Channel, DeadLetterItem, FailureRecord};

use super::{fmt_ts, ts_col};
use crate::database::{map_tr_err, Database};

const DEAD_LETTER_COLUMNS: &str =
    "id, alarm_id, channel, payload, attempts, last_error, history, enqueued_at, next_retry_at";

fn json_col<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeadLetterItem> {
    let channel: Option<String> = row.get(2)?;
    let channel = channel
        .map(|c| {
            c.parse::<Channel>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))
        })
        .transpose()?;
    Ok(DeadLetterItem {
        id: row.get(0)?,
        alarm_id: row.get(1)?,
        channel,
        payload: row.get(3)?,
        attempts: row.get(4)?,
        last_error: json_col(row, 5)?,
        history: json_col(row, 6)?,
        enqueued_at: ts_col(row, 7)?,
        next_retry_at: ts_col(row, 8)?,
    })
}

/// Store a new item, due for its first reprocessing at `next_retry_at`.
pub async fn push(
    db: &Database,
    alarm_id: &str,
    channel: Option<Channel>,
    payload: &str,
    failure: FailureRecord,
    attempts: u32,
    next_retry_at: DateTime<Utc>,
) -> Result<i64, AlarmcastError> {
    let alarm_id = alarm_id.to_string();
    let channel = channel.map(|c| c.to_string());
    let payload = payload.to_string();
    let enqueued_at = fmt_ts(failure.at);
    let next_retry_at = fmt_ts(next_retry_at);
    db.connection()
        .call(move |conn| {
            let last_error = to_json(&failure)?;
            let history = to_json(&vec![&failure])?;
            conn.execute(
                "INSERT INTO dead_letters (alarm_id, channel, payload, attempts, last_error,
                                           history, enqueued_at, next_retry_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    alarm_id,
                    channel,
                    payload,
                    attempts,
                    last_error,
                    history,
                    enqueued_at,
                    next_retry_at
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Items due at `now`, soonest first.
pub async fn due(
    db: &Database,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<DeadLetterItem>, AlarmcastError> {
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters
                 WHERE next_retry_at <= ?1
                 ORDER BY next_retry_at ASC, id ASC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![now, limit as i64], row_to_item)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// All items, newest first, for inspection.
pub async fn list(db: &Database, limit: usize) -> Result<Vec<DeadLetterItem>, AlarmcastError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters ORDER BY id DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit as i64], row_to_item)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Record another failure: bump attempts, append to history, set the next retry.
pub async fn reschedule(
    db: &Database,
    id: i64,
    attempts: u32,
    next_retry_at: DateTime<Utc>,
    failure: FailureRecord,
) -> Result<(), AlarmcastError> {
    let next_retry_at = fmt_ts(next_retry_at);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let mut history: Vec<FailureRecord> = tx.query_row(
                "SELECT history FROM dead_letters WHERE id = ?1",
                params![id],
                |row| json_col(row, 0),
            )?;
            history.push(failure.clone());
            tx.execute(
                "UPDATE dead_letters
                 SET attempts = ?2, last_error = ?3, history = ?4, next_retry_at = ?5
                 WHERE id = ?1",
                params![id, attempts, to_json(&failure)?, to_json(&history)?, next_retry_at],
            )?;
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn remove(db: &Database, id: i64) -> Result<(), AlarmcastError> {
    db.connection()
        .call(move |conn| {
            conn.execute("DELETE FROM dead_letters WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Drop items enqueued before `older_than`.
pub async fn purge(db: &Database, older_than: DateTime<Utc>) -> Result<u64, AlarmcastError> {
    let older_than = fmt_ts(older_than);
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM dead_letters WHERE enqueued_at < ?1",
                params![older_than],
            )?;
            Ok(n as u64)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn count(db: &Database) -> Result<u64, AlarmcastError> {
    db.connection()
        .call(|conn| conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0)))
        .await
        .map_err(map_tr_err)
}
