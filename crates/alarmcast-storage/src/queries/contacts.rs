// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contact lookups and administration.

use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::params;
use rusqlite::types::Type;

use alarmcast_core::{AlarmcastError, Contact, QuietHours};

use super::{fmt_ts, opt_ts_col};
use crate::database::{map_tr_err, Database};

const TIME_FORMAT: &str = "%H:%M";

const CONTACT_COLUMNS: &str = "id, device_imei, name, email, phone, push_token, priority, active,
     quiet_start, quiet_end, quiet_utc_offset, bounce_count, last_bounce_at";

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, TIME_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let quiet_start: Option<String> = row.get(8)?;
    let quiet_end: Option<String> = row.get(9)?;
    let quiet_hours = match (quiet_start, quiet_end) {
        (Some(start), Some(end)) => Some(QuietHours {
            start: parse_time(8, &start)?,
            end: parse_time(9, &end)?,
            utc_offset_minutes: row.get(10)?,
        }),
        _ => None,
    };
    Ok(Contact {
        id: row.get(0)?,
        device_imei: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        push_token: row.get(5)?,
        priority: row.get(6)?,
        active: row.get(7)?,
        quiet_hours,
        bounce_count: row.get(11)?,
        last_bounce_at: opt_ts_col(row, 12)?,
    })
}

/// Active contacts of a device, highest priority (lowest number) first.
pub async fn active_contacts(db: &Database, imei: &str) -> Result<Vec<Contact>, AlarmcastError> {
    let imei = imei.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 WHERE device_imei = ?1 AND active = 1
                 ORDER BY priority ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![imei], row_to_contact)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Insert or replace a contact. Bounce counters are preserved on update.
pub async fn upsert_contact(db: &Database, contact: &Contact) -> Result<(), AlarmcastError> {
    contact.validate().map_err(AlarmcastError::Delivery)?;
    let c = contact.clone();
    db.connection()
        .call(move |conn| {
            let (start, end, offset) = match &c.quiet_hours {
                Some(q) => (
                    Some(q.start.format(TIME_FORMAT).to_string()),
                    Some(q.end.format(TIME_FORMAT).to_string()),
                    q.utc_offset_minutes,
                ),
                None => (None, None, 0),
            };
            conn.execute(
                "INSERT INTO contacts (id, device_imei, name, email, phone, push_token, priority,
                                       active, quiet_start, quiet_end, quiet_utc_offset)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT (id) DO UPDATE SET
                     device_imei = excluded.device_imei,
                     name = excluded.name,
                     email = excluded.email,
                     phone = excluded.phone,
                     push_token = excluded.push_token,
                     priority = excluded.priority,
                     active = excluded.active,
                     quiet_start = excluded.quiet_start,
                     quiet_end = excluded.quiet_end,
                     quiet_utc_offset = excluded.quiet_utc_offset",
                params![
                    c.id,
                    c.device_imei,
                    c.name,
                    c.email,
                    c.phone,
                    c.push_token,
                    c.priority,
                    c.active,
                    start,
                    end,
                    offset
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Bump a contact's bounce counter. Returns the new count.
pub async fn record_bounce(
    db: &Database,
    contact_id: &str,
    at: DateTime<Utc>,
) -> Result<u32, AlarmcastError> {
    let id = contact_id.to_string();
    let at = fmt_ts(at);
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "UPDATE contacts SET bounce_count = bounce_count + 1, last_bounce_at = ?2
                 WHERE id = ?1
                 RETURNING bounce_count",
                params![id, at],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Deactivate contacts whose bounce count reached `max_bounces`.
pub async fn deactivate_bounced(db: &Database, max_bounces: u32) -> Result<u64, AlarmcastError> {
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE contacts SET active = 0 WHERE active = 1 AND bounce_count >= ?1",
                params![max_bounces],
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

    fn contact(id: &str, priority: i32) -> Contact {
        Contact {
            id: id.into(),
            device_imei: "356938035643809".into(),
            name: Some(format!("Contact {id}")),
            email: Some(format!("{id}@example.com")),
            phone: None,
            push_token: None,
            priority,
            active: true,
            quiet_hours: None,
            bounce_count: 0,
            last_bounce_at: None,
        }
    }

    #[tokio::test]
    async fn active_contacts_ordered_by_priority() {
        let db = db().await;
        upsert_contact(&db, &contact("b", 2)).await.unwrap();
        upsert_contact(&db, &contact("a", 1)).await.unwrap();
        let mut off = contact("c", 0);
        off.active = false;
        upsert_contact(&db, &off).await.unwrap();

        let ids: Vec<_> = active_contacts(&db, "356938035643809")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn quiet_hours_survive_storage() {
        let db = db().await;
        let mut c = contact("q", 0);
        c.quiet_hours = Some(QuietHours {
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(6, 30, 0).unwrap(),
            utc_offset_minutes: -300,
        });
        upsert_contact(&db, &c).await.unwrap();
        let loaded = active_contacts(&db, &c.device_imei).await.unwrap();
        assert_eq!(loaded[0].quiet_hours, c.quiet_hours);
    }

    #[tokio::test]
    async fn contact_without_email_or_phone_is_rejected() {
        let db = db().await;
        let mut c = contact("x", 0);
        c.email = None;
        assert!(upsert_contact(&db, &c).await.is_err());
    }

    #[tokio::test]
    async fn bounces_accumulate_and_deactivate() {
        let db = db().await;
        upsert_contact(&db, &contact("a", 0)).await.unwrap();
        for expected in 1..=3 {
            assert_eq!(record_bounce(&db, "a", Utc::now()).await.unwrap(), expected);
        }
        assert_eq!(deactivate_bounced(&db, 3).await.unwrap(), 1);
        assert!(active_contacts(&db, "356938035643809").await.unwrap().is_empty());
    }
}
