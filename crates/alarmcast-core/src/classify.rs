// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pure classification of raw provider and transport failures.
//!
//! Channel senders turn whatever their client library returned into a
//! [`ProviderFailure`] and call [`classify`]. The result carries the retry
//! and severity metadata the processor and metrics need.

use std::time::Duration;

use crate::error::{ClassifiedError, ErrorKind, Severity};

/// Network error codes that are always treated as transient.
const NETWORK_CODES: [(&str, &str); 4] = [
    ("ETIMEDOUT", "timeout"),
    ("ECONNREFUSED", "connection_refused"),
    ("ENOTFOUND", "dns_not_found"),
    ("ECONNRESET", "connection_reset"),
];

/// A raw failure as observed at the provider boundary.
#[derive(Debug, Clone)]
pub enum ProviderFailure {
    /// Already classified upstream; passed through untouched.
    Classified(ClassifiedError),
    /// Transport-level failure with an errno-style code.
    Network { code: String, message: String },
    /// The provider answered with a non-success HTTP status.
    Http {
        status: u16,
        retry_after: Option<Duration>,
        message: String,
    },
    /// The provider explicitly signalled throttling.
    RateLimited {
        retry_after: Option<Duration>,
        limit_type: Option<String>,
        message: String,
    },
    /// Anything else.
    Other(String),
}

impl From<ClassifiedError> for ProviderFailure {
    fn from(e: ClassifiedError) -> Self {
        Self::Classified(e)
    }
}

impl From<reqwest::Error> for ProviderFailure {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::Http {
                status: status.as_u16(),
                retry_after: None,
                message: e.to_string(),
            };
        }
        let code = if e.is_timeout() {
            "ETIMEDOUT"
        } else if e.is_connect() {
            "ECONNREFUSED"
        } else if e.is_request() || e.is_body() {
            "ECONNRESET"
        } else {
            return Self::Other(e.to_string());
        };
        Self::Network {
            code: code.to_string(),
            message: e.to_string(),
        }
    }
}

impl ProviderFailure {
    /// Failure for a non-success HTTP response.
    ///
    /// `retry_after` is the raw `Retry-After` header value, if any.
    pub fn http(status: u16, retry_after: Option<&str>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            retry_after: retry_after.and_then(parse_retry_after),
            message: message.into(),
        }
    }
}

/// Parse a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Category of a permanent per-recipient mailbox rejection (SMTP 550-553).
pub const BOUNCE_CATEGORY: &str = "bounce";

/// Classify a non-success HTTP response, honouring its `Retry-After` header.
pub async fn classify_response(response: reqwest::Response) -> ClassifiedError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    classify(ProviderFailure::http(status, retry_after.as_deref(), body))
}

/// Map a raw failure onto the delivery taxonomy.
///
/// Rules are checked in order: passthrough, known network codes, HTTP
/// responses, explicit rate limits, and finally an `Unknown` fallback that
/// stays retryable.
pub fn classify(failure: ProviderFailure) -> ClassifiedError {
    match failure {
        ProviderFailure::Classified(e) => e,
        ProviderFailure::Network { code, message }
            if NETWORK_CODES.iter().any(|(c, _)| *c == code) =>
        {
            let category = NETWORK_CODES
                .iter()
                .find(|(c, _)| *c == code)
                .map(|(_, cat)| *cat)
                .unwrap_or("network");
            ClassifiedError::new(
                ErrorKind::Network,
                true,
                Severity::High,
                category,
                format!("{code}: {message}"),
            )
        }
        ProviderFailure::Http {
            status,
            retry_after,
            message,
        } => classify_http(status, retry_after, message),
        ProviderFailure::RateLimited {
            retry_after,
            limit_type,
            message,
        } => {
            let mut e = ClassifiedError::new(
                ErrorKind::RateLimit,
                true,
                Severity::High,
                "rate_limit",
                message,
            )
            .with_status_code(429);
            if let Some(after) = retry_after {
                e = e.with_retry_after(after);
            }
            if let Some(limit) = limit_type {
                e = e.with_limit_type(limit);
            }
            e
        }
        ProviderFailure::Network { code, message } => ClassifiedError::new(
            ErrorKind::Unknown,
            true,
            Severity::Medium,
            "unknown",
            format!("{code}: {message}"),
        ),
        ProviderFailure::Other(message) => {
            ClassifiedError::new(ErrorKind::Unknown, true, Severity::Medium, "unknown", message)
        }
    }
}

fn classify_http(status: u16, retry_after: Option<Duration>, message: String) -> ClassifiedError {
    let retryable = status >= 500 || status == 429;
    let severity = match status {
        500.. => Severity::High,
        400..=499 => Severity::Medium,
        _ => Severity::Low,
    };
    let category = match status {
        500.. => "server_error",
        429 => "rate_limit",
        401 => "authentication",
        403 => "authorization",
        404 => "not_found",
        _ => "client_error",
    };
    let mut e = ClassifiedError::new(
        ErrorKind::Provider,
        retryable,
        severity,
        category,
        format!("HTTP {status}: {message}"),
    )
    .with_status_code(status);
    if let Some(after) = retry_after {
        e = e.with_retry_after(after);
    }
    e
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> ClassifiedError {
        classify(ProviderFailure::Http {
            status,
            retry_after: None,
            message: "boom".into(),
        })
    }

    #[test]
    fn classified_errors_pass_through() {
        let original = ClassifiedError::configuration("missing api key");
        let out = classify(ProviderFailure::Classified(original.clone()));
        assert_eq!(out, original);
    }

    #[test]
    fn known_network_codes_are_retryable_high() {
        for (code, category) in NETWORK_CODES {
            let e = classify(ProviderFailure::Network {
                code: code.into(),
                message: "socket".into(),
            });
            assert_eq!(e.kind(), ErrorKind::Network);
            assert!(e.is_retryable());
            assert_eq!(e.severity(), Severity::High);
            assert_eq!(e.category(), category);
        }
    }

    #[test]
    fn unknown_network_code_falls_back_to_unknown() {
        let e = classify(ProviderFailure::Network {
            code: "EPIPE".into(),
            message: "broken".into(),
        });
        assert_eq!(e.kind(), ErrorKind::Unknown);
        assert!(e.is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        let e = http(503);
        assert_eq!(e.kind(), ErrorKind::Provider);
        assert!(e.is_retryable());
        assert_eq!(e.severity(), Severity::High);
        assert_eq!(e.category(), "server_error");
        assert_eq!(e.context().status_code, Some(503));
    }

    #[test]
    fn client_error_categories() {
        assert_eq!(http(401).category(), "authentication");
        assert_eq!(http(403).category(), "authorization");
        assert_eq!(http(404).category(), "not_found");
        assert_eq!(http(422).category(), "client_error");
        assert!(!http(400).is_retryable());
        assert_eq!(http(400).severity(), Severity::Medium);
    }

    #[test]
    fn http_429_is_retryable_provider_rate_limit() {
        let e = http(429);
        assert_eq!(e.kind(), ErrorKind::Provider);
        assert!(e.is_retryable());
        assert_eq!(e.category(), "rate_limit");
    }

    #[test]
    fn non_error_status_is_low_severity() {
        let e = http(302);
        assert_eq!(e.severity(), Severity::Low);
        assert!(!e.is_retryable());
    }

    #[test]
    fn explicit_rate_limit_carries_hint() {
        let e = classify(ProviderFailure::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
            limit_type: Some("per_minute".into()),
            message: "slow down".into(),
        });
        assert_eq!(e.kind(), ErrorKind::RateLimit);
        assert!(e.is_retryable());
        assert_eq!(e.severity(), Severity::High);
        assert_eq!(e.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(e.context().limit_type.as_deref(), Some("per_minute"));
    }

    #[test]
    fn retry_after_header_feeds_the_hint() {
        let e = classify(ProviderFailure::http(503, Some(" 7 "), "busy"));
        assert_eq!(e.retry_after(), Some(Duration::from_secs(7)));
        let e = classify(ProviderFailure::http(503, Some("Wed, 21 Oct 2015 07:28:00 GMT"), "busy"));
        assert_eq!(e.retry_after(), None);
    }

    #[test]
    fn fallback_is_unknown_and_retryable() {
        let e = classify(ProviderFailure::Other("???".into()));
        assert_eq!(e.kind(), ErrorKind::Unknown);
        assert!(e.is_retryable());
        assert_eq!(e.severity(), Severity::Medium);
    }

    proptest::proptest! {
        #[test]
        fn http_retryability_matches_status(status in 100u16..600) {
            let e = http(status);
            proptest::prop_assert_eq!(e.is_retryable(), status >= 500 || status == 429);
        }
    }
}
