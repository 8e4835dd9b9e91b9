// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SMS modem registry and device assignments.

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};

use alarmcast_core::{AlarmcastError, Modem, ModemHealth, ModemPackage, ServiceTag};

use super::{enum_col, fmt_ts, opt_ts_col};
use crate::database::{map_tr_err, Database};

fn parse_services(idx: usize, raw: &str) -> rusqlite::Result<Vec<ServiceTag>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<ServiceTag>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            })
        })
        .collect()
}

fn join_services(services: &[ServiceTag]) -> String {
    services
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn row_to_modem(row: &rusqlite::Row<'_>) -> rusqlite::Result<Modem> {
    let services: String = row.get(5)?;
    let cost: Option<f64> = row.get(12)?;
    let currency: Option<String> = row.get(13)?;
    let ends_at = opt_ts_col(row, 14)?;
    let package = match (cost, currency, ends_at) {
        (Some(cost), Some(currency), Some(ends_at)) => Some(ModemPackage {
            cost,
            currency,
            ends_at,
        }),
        _ => None,
    };
    Ok(Modem {
        id: row.get(0)?,
        name: row.get(1)?,
        host: row.get(2)?,
        username: row.get(3)?,
        password: row.get(4)?,
        allowed_services: parse_services(5, &services)?,
        priority: row.get(6)?,
        max_concurrent: row.get(7)?,
        enabled: row.get(8)?,
        health: enum_col(row, 9)?,
        sent_count: row.get(10)?,
        sent_limit: row.get(11)?,
        package,
    })
}

/// All modems, by priority then id.
pub async fn list_modems(db: &Database) -> Result<Vec<Modem>, AlarmcastError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, host, username, password, allowed_services, priority,
                        max_concurrent, enabled, health, sent_count, sent_limit,
                        package_cost, package_currency, package_ends_at
                 FROM modems
                 ORDER BY priority ASC, id ASC",
            )?;
            let rows = stmt.query_map([], row_to_modem)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Insert or update a modem's static settings. Usage and health are kept.
pub async fn upsert_modem(db: &Database, modem: &Modem) -> Result<(), AlarmcastError> {
    let m = modem.clone();
    let now = fmt_ts(Utc::now());
    db.connection()
        .call(move |conn| {
            let (cost, currency, ends_at) = match &m.package {
                Some(p) => (Some(p.cost), Some(p.currency.clone()), Some(fmt_ts(p.ends_at))),
                None => (None, None, None),
            };
            conn.execute(
                "INSERT INTO modems (id, name, host, username, password, allowed_services,
                                     priority, max_concurrent, enabled, health, sent_count,
                                     sent_limit, package_cost, package_currency,
                                     package_ends_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                 ON CONFLICT (id) DO UPDATE SET
                     name = excluded.name,
                     host = excluded.host,
                     username = excluded.username,
                     password = excluded.password,
                     allowed_services = excluded.allowed_services,
                     priority = excluded.priority,
                     max_concurrent = excluded.max_concurrent,
                     enabled = excluded.enabled,
                     sent_limit = excluded.sent_limit,
                     package_cost = excluded.package_cost,
                     package_currency = excluded.package_currency,
                     package_ends_at = excluded.package_ends_at,
                     updated_at = excluded.updated_at",
                params![
                    m.id,
                    m.name,
                    m.host,
                    m.username,
                    m.password,
                    join_services(&m.allowed_services),
                    m.priority,
                    m.max_concurrent,
                    m.enabled,
                    m.health.to_string(),
                    m.sent_count,
                    m.sent_limit,
                    cost,
                    currency,
                    ends_at,
                    now
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Modem dedicated to a device, if any.
pub async fn device_modem(db: &Database, imei: &str) -> Result<Option<String>, AlarmcastError> {
    let imei = imei.to_string();
    db.connection()
        .call(move |conn| {
            let found: Option<Option<String>> = conn
                .query_row(
                    "SELECT modem_id FROM devices WHERE imei = ?1",
                    params![imei],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.flatten())
        })
        .await
        .map_err(map_tr_err)
}

/// Assign (or with `None`, unassign) a device's dedicated modem.
pub async fn assign_device(
    db: &Database,
    imei: &str,
    modem_id: Option<&str>,
) -> Result<(), AlarmcastError> {
    let imei = imei.to_string();
    let modem_id = modem_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO devices (imei, modem_id) VALUES (?1, ?2)
                 ON CONFLICT (imei) DO UPDATE SET modem_id = excluded.modem_id",
                params![imei, modem_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn update_usage(
    db: &Database,
    modem_id: &str,
    sent_count: u64,
    health: ModemHealth,
) -> Result<(), AlarmcastError> {
    let id = modem_id.to_string();
    let health = health.to_string();
    let now = fmt_ts(Utc::now());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE modems SET sent_count = ?2, health = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, sent_count, health, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Zero the usage counter and mark the modem healthy. Returns false if unknown.
pub async fn reset_usage(db: &Database, modem_id: &str) -> Result<bool, AlarmcastError> {
    let id = modem_id.to_string();
    let now = fmt_ts(Utc::now());
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE modems SET sent_count = 0, health = 'healthy', updated_at = ?2
                 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::db;

    fn modem(id: &str) -> Modem {
        Modem {
            id: id.into(),
            name: format!("modem {id}"),
            host: format!("http://{id}.local"),
            username: Some("admin".into()),
            password: Some("secret".into()),
            allowed_services: vec![ServiceTag::Alarms, ServiceTag::Otp],
            priority: 1,
            max_concurrent: 2,
            enabled: true,
            health: ModemHealth::Healthy,
            sent_count: 0,
            sent_limit: Some(1000),
            package: Some(ModemPackage {
                cost: 9.5,
                currency: "EUR".into(),
                ends_at: Utc::now() + chrono::Duration::days(30),
            }),
        }
    }

    #[tokio::test]
    async fn modem_fields_persist() {
        let db = db().await;
        let m = modem("m1");
        upsert_modem(&db, &m).await.unwrap();
        let loaded = list_modems(&db).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].allowed_services, m.allowed_services);
        assert_eq!(loaded[0].sent_limit, Some(1000));
        assert_eq!(loaded[0].package.as_ref().unwrap().currency, "EUR");
    }

    #[tokio::test]
    async fn usage_update_and_reset() {
        let db = db().await;
        upsert_modem(&db, &modem("m1")).await.unwrap();
        update_usage(&db, "m1", 42, ModemHealth::Degraded).await.unwrap();

        // Upserting static settings keeps usage.
        upsert_modem(&db, &modem("m1")).await.unwrap();
        let m = &list_modems(&db).await.unwrap()[0];
        assert_eq!((m.sent_count, m.health), (42, ModemHealth::Degraded));

        assert!(reset_usage(&db, "m1").await.unwrap());
        let m = &list_modems(&db).await.unwrap()[0];
        assert_eq!((m.sent_count, m.health), (0, ModemHealth::Healthy));
        assert!(!reset_usage(&db, "nope").await.unwrap());
    }

    #[tokio::test]
    async fn device_assignment() {
        let db = db().await;
        upsert_modem(&db, &modem("m1")).await.unwrap();
        assert_eq!(device_modem(&db, "111").await.unwrap(), None);
        assign_device(&db, "111", Some("m1")).await.unwrap();
        assert_eq!(device_modem(&db, "111").await.unwrap().as_deref(), Some("m1"));
        assign_device(&db, "111", None).await.unwrap();
        assert_eq!(device_modem(&db, "111").await.unwrap(), None);
    }
}
