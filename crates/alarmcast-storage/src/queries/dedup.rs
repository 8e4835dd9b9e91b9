// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Completed-send markers used for duplicate suppression.

use chrono::{DateTime, Utc};
use rusqlite::params;

use alarmcast_core::AlarmcastError;

use super::fmt_ts;
use crate::database::{map_tr_err, Database};

/// Whether `key` was marked completed at or after `since`.
pub async fn completed_since(
    db: &Database,
    key: &str,
    since: DateTime<Utc>,
) -> Result<bool, AlarmcastError> {
    let key = key.to_string();
    let since = fmt_ts(since);
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT EXISTS (
                     SELECT 1 FROM sent_markers WHERE dedup_key = ?1 AND completed_at >= ?2
                 )",
                params![key, since],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn mark_completed(
    db: &Database,
    key: &str,
    alarm_id: &str,
    at: DateTime<Utc>,
) -> Result<(), AlarmcastError> {
    let key = key.to_string();
    let alarm_id = alarm_id.to_string();
    let at = fmt_ts(at);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sent_markers (dedup_key, alarm_id, completed_at)
                 VALUES (?1, ?2, ?3)",
                params![key, alarm_id, at],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Drop markers completed before `before`.
pub async fn purge_before(db: &Database, before: DateTime<Utc>) -> Result<u64, AlarmcastError> {
    let before = fmt_ts(before);
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM sent_markers WHERE completed_at < ?1",
                params![before],
            )?;
            Ok(n as u64)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::db;
    use chrono::Duration;

    #[tokio::test]
    async fn marker_respects_window() {
        let db = db().await;
        let now = Utc::now();
        assert!(!completed_since(&db, "k", now - Duration::minutes(5)).await.unwrap());

        mark_completed(&db, "k", "a-1", now - Duration::minutes(10)).await.unwrap();
        assert!(!completed_since(&db, "k", now - Duration::minutes(5)).await.unwrap());

        mark_completed(&db, "k", "a-2", now).await.unwrap();
        assert!(completed_since(&db, "k", now - Duration::minutes(5)).await.unwrap());

        assert_eq!(purge_before(&db, now + Duration::seconds(1)).await.unwrap(), 1);
        assert!(!completed_since(&db, "k", now - Duration::minutes(5)).await.unwrap());
    }
}
