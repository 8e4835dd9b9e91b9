// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the alarmcast delivery engine.
//!
//! [`AlarmcastError`] is the infrastructure error used across crates.
//! [`ClassifiedError`] is the delivery-failure taxonomy that drives retry and
//! dead-letter decisions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// The primary error type used across storage, queue, and runtime plumbing.
#[derive(Debug, Error)]
pub enum AlarmcastError {
    /// Configuration errors (invalid TOML, missing required fields, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Message queue errors (dequeue, ack, malformed entry).
    #[error("queue error: {message}")]
    Queue {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A classified delivery failure.
    #[error(transparent)]
    Delivery(ClassifiedError),

    /// Input rejected before any provider was contacted.
    #[error("validation error: {message}")]
    Validation {
        field: Option<String>,
        message: String,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AlarmcastError {
    /// Map this error onto the delivery taxonomy.
    ///
    /// Infrastructure failures (storage, queue, timeouts) are transient from the
    /// pipeline's point of view and classify as retryable.
    pub fn classify(&self) -> ClassifiedError {
        match self {
            Self::Delivery(e) => e.clone(),
            Self::Validation { field, message } => {
                ClassifiedError::validation(message.clone(), field.clone())
            }
            Self::Config(message) => ClassifiedError::configuration(message.clone()),
            Self::Timeout { duration } => ClassifiedError::new(
                ErrorKind::Network,
                true,
                Severity::High,
                "timeout",
                format!("operation timed out after {duration:?}"),
            ),
            other => ClassifiedError::new(
                ErrorKind::Unknown,
                true,
                Severity::Medium,
                "infrastructure",
                other.to_string(),
            ),
        }
    }
}

impl From<ClassifiedError> for AlarmcastError {
    fn from(e: ClassifiedError) -> Self {
        Self::Delivery(e)
    }
}

impl From<serde_json::Error> for AlarmcastError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation {
            field: None,
            message: format!("malformed JSON: {e}"),
        }
    }
}

/// The kind of a delivery failure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Bad input. Never retried.
    Validation,
    /// Provider throttling. Retried with the provider's hint or default backoff.
    RateLimit,
    /// Provider returned an error response. Retried only for 5xx / 429.
    Provider,
    /// Transport-level failure. Always retried.
    Network,
    /// Operator must fix something. Never retried.
    Configuration,
    /// Unrecognised failure. Retried conservatively.
    Unknown,
}

/// How loudly a failure should be surfaced.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Optional context attached to a classified failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// HTTP (or SMTP) status code returned by the provider.
    pub status_code: Option<u16>,
    /// Provider-supplied or breaker-computed wait before the next attempt.
    pub retry_after: Option<Duration>,
    /// Offending field for validation failures.
    pub field: Option<String>,
    /// Which limit was hit (e.g. `per_second`, `daily`).
    pub limit_type: Option<String>,
    /// Endpoint (provider, modem, breaker) the failure came from.
    pub endpoint: Option<String>,
}

/// A failure mapped onto the delivery taxonomy.
///
/// Created at the point of failure and never mutated afterwards; the
/// `with_*` methods consume `self` and are meant for construction only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    kind: ErrorKind,
    retryable: bool,
    severity: Severity,
    category: String,
    message: String,
    #[serde(default)]
    context: ErrorContext,
}

impl ClassifiedError {
    pub fn new(
        kind: ErrorKind,
        retryable: bool,
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            retryable,
            severity,
            category: category.into(),
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Bad input. Never retryable, severity medium.
    pub fn validation(message: impl Into<String>, field: Option<String>) -> Self {
        let mut e = Self::new(
            ErrorKind::Validation,
            false,
            Severity::Medium,
            "validation",
            message,
        );
        e.context.field = field;
        e
    }

    /// Operator-fixable misconfiguration. Never retryable, severity critical.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Configuration,
            false,
            Severity::Critical,
            "configuration",
            message,
        )
    }

    /// Rejection from an open circuit breaker.
    pub fn circuit_open(endpoint: &str, remaining: Duration) -> Self {
        let secs = remaining.as_secs_f64().ceil() as u64;
        Self::new(
            ErrorKind::Provider,
            true,
            Severity::Medium,
            "circuit_open",
            format!("circuit for {endpoint} is open, retry in {secs}s"),
        )
        .with_endpoint(endpoint)
        .with_retry_after(Duration::from_secs(secs))
    }

    /// Rejection because the half-open probe slots are taken.
    pub fn circuit_busy(endpoint: &str, retry_after: Duration) -> Self {
        Self::new(
            ErrorKind::Provider,
            true,
            Severity::Low,
            "circuit_busy",
            format!("circuit for {endpoint} is probing recovery, try again shortly"),
        )
        .with_endpoint(endpoint)
        .with_retry_after(retry_after)
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.context.status_code = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.context.retry_after = Some(retry_after);
        self
    }

    pub fn with_limit_type(mut self, limit_type: impl Into<String>) -> Self {
        self.context.limit_type = Some(limit_type.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.context.endpoint = Some(endpoint.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.context.retry_after
    }

    /// True for breaker rejections (`circuit_open` / `circuit_busy`).
    pub fn is_circuit_rejection(&self) -> bool {
        matches!(self.category.as_str(), "circuit_open" | "circuit_busy")
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.category, self.message)
    }
}

impl std::error::Error for ClassifiedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_never_retryable() {
        let e = ClassifiedError::validation("imei missing", Some("imei".into()));
        assert_eq!(e.kind(), ErrorKind::Validation);
        assert!(!e.is_retryable());
        assert_eq!(e.severity(), Severity::Medium);
        assert_eq!(e.context().field.as_deref(), Some("imei"));
    }

    #[test]
    fn configuration_is_critical_and_final() {
        let e = ClassifiedError::configuration("no SMTP host");
        assert_eq!(e.kind(), ErrorKind::Configuration);
        assert!(!e.is_retryable());
        assert_eq!(e.severity(), Severity::Critical);
    }

    #[test]
    fn circuit_open_rounds_remaining_up() {
        let e = ClassifiedError::circuit_open("email:smtp", Duration::from_millis(12_300));
        assert!(e.is_retryable());
        assert!(e.is_circuit_rejection());
        assert_eq!(e.retry_after(), Some(Duration::from_secs(13)));
        assert!(e.message().contains("13s"));
    }

    #[test]
    fn infrastructure_errors_classify_as_retryable_unknown() {
        let err = AlarmcastError::Storage {
            source: Box::new(std::io::Error::other("disk full")),
        };
        let c = err.classify();
        assert_eq!(c.kind(), ErrorKind::Unknown);
        assert!(c.is_retryable());
    }

    #[test]
    fn malformed_json_becomes_validation() {
        let err: AlarmcastError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert_eq!(err.classify().kind(), ErrorKind::Validation);
    }

    #[test]
    fn display_includes_kind_and_category() {
        let e = ClassifiedError::configuration("x");
        assert_eq!(e.to_string(), "CONFIGURATION (configuration): x");
    }
}
