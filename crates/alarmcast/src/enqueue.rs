// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `alarmcast enqueue` command implementation.

use std::path::Path;

use alarmcast_config::model::AlarmcastConfig;
use alarmcast_core::{Alarm, AlarmQueue, AlarmcastError};
use alarmcast_storage::{SqliteQueue, SqliteStorage};
use tracing::info;

/// Validate the alarm in `file` and publish it onto the queue.
pub async fn run_enqueue(config: &AlarmcastConfig, file: &Path) -> Result<(), AlarmcastError> {
    let raw = tokio::fs::read_to_string(file).await.map_err(|e| {
        AlarmcastError::Config(format!("cannot read {}: {e}", file.display()))
    })?;
    let payload = parse_alarm(&raw)?;

    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    let queue = SqliteQueue::from_config(storage.database()?.clone(), &config.queue);
    let id = queue.publish(&payload).await?;

    info!(message_id = id, file = %file.display(), "alarm enqueued");
    println!("enqueued message {id}");
    Ok(())
}

/// Parse and validate one alarm, returning its canonical JSON.
fn parse_alarm(raw: &str) -> Result<String, AlarmcastError> {
    let alarm: Alarm = serde_json::from_str(raw)?;
    alarm.validate()?;
    Ok(serde_json::to_string(&alarm)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALARM: &str = r#"{
        "id": "a-1",
        "imei": "356938035643809",
        "server_time": "2026-03-01T10:00:05Z",
        "gps_time": "2026-03-01T10:00:00Z",
        "latitude": 52.52,
        "longitude": 13.40,
        "status": "sos",
        "is_sms": true
    }"#;

    #[test]
    fn valid_alarm_is_normalized() {
        let payload = parse_alarm(ALARM).unwrap();
        let back: Alarm = serde_json::from_str(&payload).unwrap();
        assert_eq!(back.id, "a-1");
        assert!(back.is_sms);
    }

    #[test]
    fn invalid_alarm_is_rejected() {
        let bad = ALARM.replace("356938035643809", "imei-x");
        let err = parse_alarm(&bad).unwrap_err();
        assert!(matches!(err, AlarmcastError::Delivery(_)));
        assert!(parse_alarm("{").is_err());
    }
}
