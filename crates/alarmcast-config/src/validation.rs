// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks semantic constraints serde cannot express: positive limits,
//! ordered thresholds, and channel settings required once a channel is enabled.

use alarmcast_core::ServiceTag;

use crate::diagnostic::ConfigError;
use crate::model::{AlarmcastConfig, HttpChannelConfig};

/// Validate a deserialized configuration.
///
/// Collects every failure instead of stopping at the first one.
pub fn validate_config(config: &AlarmcastConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut check = |ok: bool, message: String| {
        if !ok {
            errors.push(ConfigError::validation(message));
        }
    };

    check(
        !config.storage.database_path.trim().is_empty(),
        "storage.database_path must not be empty".into(),
    );
    check(
        matches!(config.service.log_format.as_str(), "pretty" | "json"),
        format!(
            "service.log_format must be `pretty` or `json`, got `{}`",
            config.service.log_format
        ),
    );

    check(config.queue.prefetch >= 1, "queue.prefetch must be at least 1".into());
    check(
        config.queue.max_message_attempts >= 1,
        "queue.max_message_attempts must be at least 1".into(),
    );
    check(
        config.queue.nack_base_delay_ms <= config.queue.nack_max_delay_ms,
        "queue.nack_base_delay_ms must not exceed queue.nack_max_delay_ms".into(),
    );

    check(
        config.processor.dedup_window_secs >= 1,
        "processor.dedup_window_secs must be at least 1".into(),
    );
    check(
        config.processor.retry_base_delay_ms <= config.processor.retry_max_delay_ms,
        "processor.retry_base_delay_ms must not exceed processor.retry_max_delay_ms".into(),
    );

    check(
        config.breaker.failure_threshold >= 1,
        "breaker.failure_threshold must be at least 1".into(),
    );
    check(
        config.breaker.half_open_max_probes >= 1,
        "breaker.half_open_max_probes must be at least 1".into(),
    );

    let pool = &config.modem_pool;
    check(
        pool.degraded_after_failures >= 1
            && pool.degraded_after_failures <= pool.unhealthy_after_failures,
        format!(
            "modem_pool.degraded_after_failures ({}) must be at least 1 and not exceed \
             modem_pool.unhealthy_after_failures ({})",
            pool.degraded_after_failures, pool.unhealthy_after_failures
        ),
    );
    check(
        pool.service.parse::<ServiceTag>().is_ok(),
        format!(
            "modem_pool.service must be one of alarms, commands, otp, marketing, got `{}`",
            pool.service
        ),
    );

    check(
        config.dead_letter.batch_size >= 1,
        "dead_letter.batch_size must be at least 1".into(),
    );
    check(
        config.dead_letter.base_delay_ms <= config.dead_letter.max_delay_ms,
        "dead_letter.base_delay_ms must not exceed dead_letter.max_delay_ms".into(),
    );

    check(
        config.workers.stale_after_secs < config.workers.dead_after_secs,
        "workers.stale_after_secs must be less than workers.dead_after_secs".into(),
    );

    let email = &config.email;
    check(
        email.max_concurrent >= 1 && email.max_retries >= 1,
        "email.max_concurrent and email.max_retries must be at least 1".into(),
    );
    if email.enabled {
        check(
            email.smtp_host.as_deref().is_some_and(|h| !h.trim().is_empty()),
            "email.smtp_host is required when email is enabled".into(),
        );
        check(
            email.from.as_deref().is_some_and(|f| f.contains('@')),
            "email.from must be a mailbox when email is enabled".into(),
        );
    }

    check(
        config.sms.max_concurrent >= 1 && config.sms.max_retries >= 1,
        "sms.max_concurrent and sms.max_retries must be at least 1".into(),
    );

    for (section, channel) in [("voice", &config.voice), ("push", &config.push)] {
        validate_http_channel(section, channel, &mut check);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_http_channel(
    section: &str,
    channel: &HttpChannelConfig,
    check: &mut impl FnMut(bool, String),
) {
    check(
        channel.max_concurrent >= 1 && channel.max_retries >= 1,
        format!("{section}.max_concurrent and {section}.max_retries must be at least 1"),
    );
    if channel.enabled {
        check(
            channel
                .endpoint
                .as_deref()
                .is_some_and(|e| e.starts_with("http://") || e.starts_with("https://")),
            format!("{section}.endpoint must be an http(s) URL when {section} is enabled"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&AlarmcastConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = AlarmcastConfig::default();
        config.queue.prefetch = 0;
        config.breaker.failure_threshold = 0;
        config.modem_pool.degraded_after_failures = 9;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn enabled_channels_need_endpoints() {
        let mut config = AlarmcastConfig::default();
        config.email.enabled = true;
        config.voice.enabled = true;
        config.voice.endpoint = Some("ftp://nope".into());
        let errors = validate_config(&config).unwrap_err();
        let text: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert!(text.iter().any(|t| t.contains("email.smtp_host")));
        assert!(text.iter().any(|t| t.contains("email.from")));
        assert!(text.iter().any(|t| t.contains("voice.endpoint")));
    }
}
