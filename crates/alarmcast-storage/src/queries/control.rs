// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Administrative flags: processing pause and per-channel mock mode.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use alarmcast_core::{AlarmcastError, Channel};

use super::fmt_ts;
use crate::database::{map_tr_err, Database};

const PAUSED_KEY: &str = "paused";

fn mock_key(channel: Channel) -> String {
    format!("mock_{channel}")
}

pub async fn get_flag(db: &Database, key: &str) -> Result<bool, AlarmcastError> {
    let key = key.to_string();
    db.connection()
        .call(move |conn| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM system_state WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.is_some_and(|v| v == "true"))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_flag(db: &Database, key: &str, on: bool) -> Result<(), AlarmcastError> {
    let key = key.to_string();
    let now = fmt_ts(Utc::now());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO system_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET
                     value = excluded.value, updated_at = excluded.updated_at",
                params![key, if on { "true" } else { "false" }, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn is_paused(db: &Database) -> Result<bool, AlarmcastError> {
    get_flag(db, PAUSED_KEY).await
}

pub async fn set_paused(db: &Database, paused: bool) -> Result<(), AlarmcastError> {
    set_flag(db, PAUSED_KEY, paused).await
}

pub async fn is_mock(db: &Database, channel: Channel) -> Result<bool, AlarmcastError> {
    get_flag(db, &mock_key(channel)).await
}

pub async fn set_mock(db: &Database, channel: Channel, on: bool) -> Result<(), AlarmcastError> {
    set_flag(db, &mock_key(channel), on).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::db;

    #[tokio::test]
    async fn flags_default_off_and_toggle() {
        let db = db().await;
        assert!(!is_paused(&db).await.unwrap());
        set_paused(&db, true).await.unwrap();
        assert!(is_paused(&db).await.unwrap());
        set_paused(&db, false).await.unwrap();
        assert!(!is_paused(&db).await.unwrap());

        set_mock(&db, Channel::Sms, true).await.unwrap();
        assert!(is_mock(&db, Channel::Sms).await.unwrap());
        assert!(!is_mock(&db, Channel::Email).await.unwrap());
    }
}
