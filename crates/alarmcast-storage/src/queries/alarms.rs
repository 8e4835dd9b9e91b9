// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Alarm records and per-channel delivery state.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use alarmcast_core::{AlarmcastError, Alarm, Channel};

use super::{enum_col, fmt_ts, opt_ts_col};
use crate::database::{map_tr_err, Database};

/// Insert an alarm if its id is new. Returns true if it was inserted.
pub async fn save_alarm(db: &Database, alarm: &Alarm) -> Result<bool, AlarmcastError> {
    let payload = serde_json::to_string(alarm).map_err(|e| AlarmcastError::Storage {
        source: Box::new(e),
    })?;
    let id = alarm.id.clone();
    let imei = alarm.imei.clone();
    let status = alarm.status.clone();
    let priority = alarm.priority;
    let now = fmt_ts(Utc::now());
    db.connection()
        .call(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO alarms (id, imei, status, priority, payload, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, imei, status, priority, payload, now],
            )?;
            Ok(inserted == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Load an alarm with its recorded sent timestamps applied.
pub async fn get_alarm(db: &Database, alarm_id: &str) -> Result<Option<Alarm>, AlarmcastError> {
    let id = alarm_id.to_string();
    let found = db
        .connection()
        .call(move |conn| {
            let payload: Option<String> = conn
                .query_row("SELECT payload FROM alarms WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })
                .optional()?;
            let Some(payload) = payload else {
                return Ok(None);
            };
            let mut stmt = conn.prepare(
                "SELECT channel, sent_at FROM alarm_deliveries
                 WHERE alarm_id = ?1 AND sent_at IS NOT NULL",
            )?;
            let sent = stmt
                .query_map(params![id], |row| {
                    Ok((enum_col::<Channel>(row, 0)?, opt_ts_col(row, 1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some((payload, sent)))
        })
        .await
        .map_err(map_tr_err)?;

    let Some((payload, sent)) = found else {
        return Ok(None);
    };
    let mut alarm: Alarm = serde_json::from_str(&payload).map_err(|e| AlarmcastError::Storage {
        source: Box::new(e),
    })?;
    for (channel, at) in sent {
        if let Some(at) = at {
            alarm.mark_sent(channel, at);
        }
    }
    Ok(Some(alarm))
}

/// Channels delivered for this alarm id.
pub async fn sent_channels(db: &Database, alarm_id: &str) -> Result<Vec<Channel>, AlarmcastError> {
    let id = alarm_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT channel FROM alarm_deliveries
                 WHERE alarm_id = ?1 AND sent_at IS NOT NULL
                 ORDER BY channel",
            )?;
            let rows = stmt.query_map(params![id], |row| enum_col::<Channel>(row, 0))?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Mark a channel delivered. Clears any earlier failure.
pub async fn record_channel_sent(
    db: &Database,
    alarm_id: &str,
    channel: Channel,
    at: DateTime<Utc>,
    retry_count: u32,
) -> Result<(), AlarmcastError> {
    let id = alarm_id.to_string();
    let channel = channel.to_string();
    let at = fmt_ts(at);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO alarm_deliveries (alarm_id, channel, sent_at, failed_at, retry_count)
                 VALUES (?1, ?2, ?3, NULL, ?4)
                 ON CONFLICT (alarm_id, channel) DO UPDATE SET
                     sent_at = excluded.sent_at,
                     failed_at = NULL,
                     retry_count = excluded.retry_count",
                params![id, channel, at, retry_count],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Mark a channel permanently failed. A previous `sent_at` is kept.
pub async fn record_channel_failed(
    db: &Database,
    alarm_id: &str,
    channel: Channel,
    retry_count: u32,
) -> Result<(), AlarmcastError> {
    let id = alarm_id.to_string();
    let channel = channel.to_string();
    let now = fmt_ts(Utc::now());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO alarm_deliveries (alarm_id, channel, sent_at, failed_at, retry_count)
                 VALUES (?1, ?2, NULL, ?3, ?4)
                 ON CONFLICT (alarm_id, channel) DO UPDATE SET
                     failed_at = excluded.failed_at,
                     retry_count = excluded.retry_count",
                params![id, channel, now, retry_count],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
