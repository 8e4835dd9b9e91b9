// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Alarm and contact fixtures for a single test device.

use chrono::{TimeZone, Utc};

use alarmcast_core::{Alarm, Contact};

/// IMEI of the fixture device.
pub const IMEI: &str = "356938035643809";

/// An SOS alarm from [`IMEI`] requesting email and SMS.
///
/// All fixture alarms share a GPS time, so two of them with the same status
/// produce the same dedup key. Change `gps_time` or `status` to tell them apart.
pub fn alarm(id: &str) -> Alarm {
    let gps_time = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().unwrap_or_default();
    Alarm {
        id: id.to_string(),
        imei: IMEI.to_string(),
        server_time: gps_time + chrono::Duration::seconds(5),
        gps_time,
        latitude: 52.52,
        longitude: 13.405,
        altitude: 34.0,
        angle: 90.0,
        speed: 0.0,
        satellites: 9,
        status: "sos".to_string(),
        is_sms: true,
        is_email: true,
        is_call: false,
        is_push: false,
        sms_sent_at: None,
        email_sent_at: None,
        call_sent_at: None,
        push_sent_at: None,
        retry_count: 0,
        priority: 0,
        scheduled_at: None,
        state: serde_json::Map::new(),
        category: None,
    }
}

/// An active contact of [`IMEI`] reachable on every channel.
///
/// Email is `<id>@example.com` and the push token is `push-<id>`.
pub fn contact(id: &str) -> Contact {
    Contact {
        id: id.to_string(),
        device_imei: IMEI.to_string(),
        name: Some(format!("Contact {id}")),
        email: Some(format!("{id}@example.com")),
        phone: Some("+15550100".to_string()),
        push_token: Some(format!("push-{id}")),
        priority: 0,
        active: true,
        quiet_hours: None,
        bounce_count: 0,
        last_bounce_at: None,
    }
}
