// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plain-text rendering of alarms for channel payloads.

use crate::types::Alarm;

/// Maximum length of a single-segment SMS body.
pub const SMS_MAX_LEN: usize = 160;

/// Subject line used by email and push titles.
pub fn subject(alarm: &Alarm) -> String {
    format!("[alarm] {} on device {}", alarm.status.to_uppercase(), alarm.imei)
}

/// Full text body used by email.
pub fn body(alarm: &Alarm) -> String {
    let mut out = format!(
        "Alarm: {status}\nDevice: {imei}\nTime (GPS): {gps}\nPosition: {lat:.6}, {lon:.6}\nSpeed: {speed:.1} km/h\nSatellites: {sats}\nMap: https://maps.google.com/?q={lat:.6},{lon:.6}",
        status = alarm.status,
        imei = alarm.imei,
        gps = alarm.gps_time.to_rfc3339(),
        lat = alarm.latitude,
        lon = alarm.longitude,
        speed = alarm.speed,
        sats = alarm.satellites,
    );
    if let Some(category) = &alarm.category {
        out.push_str(&format!("\nCategory: {category}"));
    }
    out
}

/// Short text for SMS and voice, truncated on a char boundary.
pub fn short_text(alarm: &Alarm) -> String {
    let text = format!(
        "{} {} at {:.5},{:.5} {}",
        alarm.status.to_uppercase(),
        alarm.imei,
        alarm.latitude,
        alarm.longitude,
        alarm.gps_time.format("%Y-%m-%d %H:%M UTC"),
    );
    truncate_chars(&text, SMS_MAX_LEN)
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm() -> Alarm {
        serde_json::from_value(serde_json::json!({
            "id": "a-1",
            "imei": "356938035643809",
            "server_time": "2026-03-01T10:00:05Z",
            "gps_time": "2026-03-01T10:00:00Z",
            "latitude": 52.52,
            "longitude": 13.40,
            "status": "sos",
            "category": "panic"
        }))
        .unwrap()
    }

    #[test]
    fn short_text_fits_one_segment() {
        let mut a = alarm();
        a.status = "x".repeat(400);
        assert_eq!(short_text(&a).chars().count(), SMS_MAX_LEN);
    }

    #[test]
    fn body_mentions_position_and_category() {
        let b = body(&alarm());
        assert!(b.contains("52.520000, 13.400000"));
        assert!(b.contains("Category: panic"));
        assert!(subject(&alarm()).contains("SOS"));
    }
}
