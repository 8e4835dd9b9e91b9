// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SMTP transport and SMTP error classification.

use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use alarmcast_config::model::EmailConfig;
use alarmcast_core::{
    classify, AlarmcastError, ClassifiedError, ErrorKind, ProviderFailure, Severity,
    BOUNCE_CATEGORY,
};

/// Delivers one built message.
#[async_trait]
pub trait MailTransport: Send + Sync + 'static {
    /// Returns the server's acceptance line, used as the message id.
    async fn deliver(&self, message: Message) -> Result<String, ClassifiedError>;

    /// Whether the server accepts connections.
    async fn ping(&self) -> Result<bool, ClassifiedError>;
}

/// Fields of an SMTP failure that drive classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmtpFailure {
    pub code: Option<u16>,
    pub permanent: bool,
    pub transient: bool,
    pub timeout: bool,
    pub client: bool,
    pub message: String,
}

impl From<&lettre::transport::smtp::Error> for SmtpFailure {
    fn from(e: &lettre::transport::smtp::Error) -> Self {
        Self {
            code: e.status().and_then(|c| c.to_string().parse().ok()),
            permanent: e.is_permanent(),
            transient: e.is_transient(),
            timeout: e.is_timeout(),
            client: e.is_client(),
            message: e.to_string(),
        }
    }
}

/// Map an SMTP failure onto the delivery taxonomy.
///
/// 5xx replies are permanent; 550-553 are mailbox bounces. 4xx replies are
/// transient. Timeouts and connection failures are network errors.
pub fn classify_smtp(f: SmtpFailure) -> ClassifiedError {
    if f.permanent {
        let category = match f.code {
            Some(550..=553) => BOUNCE_CATEGORY,
            _ => "smtp_permanent",
        };
        let e = ClassifiedError::new(ErrorKind::Provider, false, Severity::High, category, f.message);
        return match f.code {
            Some(code) => e.with_status_code(code),
            None => e,
        };
    }
    if f.transient {
        let e = ClassifiedError::new(
            ErrorKind::Provider,
            true,
            Severity::Medium,
            "smtp_transient",
            f.message,
        );
        return match f.code {
            Some(code) => e.with_status_code(code),
            None => e,
        };
    }
    let failure = if f.timeout {
        ProviderFailure::Network {
            code: "ETIMEDOUT".into(),
            message: f.message,
        }
    } else if f.client {
        ProviderFailure::Other(f.message)
    } else {
        ProviderFailure::Network {
            code: "ECONNREFUSED".into(),
            message: f.message,
        }
    };
    classify(failure)
}

/// lettre SMTP transport over tokio.
#[derive(Clone)]
pub struct SmtpMailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl std::fmt::Debug for SmtpMailTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailTransport")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl SmtpMailTransport {
    /// STARTTLS relay when `starttls` is set, plaintext otherwise.
    pub fn from_config(config: &EmailConfig) -> Result<Self, AlarmcastError> {
        let host = config
            .smtp_host
            .clone()
            .ok_or_else(|| AlarmcastError::Config("email.smtp_host is required".into()))?;
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
                .map_err(|e| AlarmcastError::Config(format!("invalid SMTP relay `{host}`: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&host)
        };
        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(Self {
            transport: builder.build(),
            host,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn deliver(&self, message: Message) -> Result<String, ClassifiedError> {
        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| classify_smtp(SmtpFailure::from(&e)).with_endpoint(&self.host))?;
        Ok(response.message().collect::<Vec<_>>().join(" "))
    }

    async fn ping(&self) -> Result<bool, ClassifiedError> {
        self.transport
            .test_connection()
            .await
            .map_err(|e| classify_smtp(SmtpFailure::from(&e)).with_endpoint(&self.host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_rejection_is_a_bounce() {
        let e = classify_smtp(SmtpFailure {
            code: Some(550),
            permanent: true,
            message: "mailbox unavailable".into(),
            ..Default::default()
        });
        assert_eq!(e.category(), BOUNCE_CATEGORY);
        assert!(!e.is_retryable());
        assert_eq!(e.context().status_code, Some(550));
    }

    #[test]
    fn other_permanent_replies_are_not_bounces() {
        let e = classify_smtp(SmtpFailure {
            code: Some(554),
            permanent: true,
            message: "transaction failed".into(),
            ..Default::default()
        });
        assert_eq!(e.category(), "smtp_permanent");
        assert!(!e.is_retryable());
    }

    #[test]
    fn transient_replies_retry() {
        let e = classify_smtp(SmtpFailure {
            code: Some(451),
            transient: true,
            message: "try later".into(),
            ..Default::default()
        });
        assert!(e.is_retryable());
        assert_eq!(e.category(), "smtp_transient");
    }

    #[test]
    fn timeouts_and_connection_failures_are_network() {
        let t = classify_smtp(SmtpFailure {
            timeout: true,
            message: "timed out".into(),
            ..Default::default()
        });
        assert_eq!((t.kind(), t.category()), (ErrorKind::Network, "timeout"));

        let c = classify_smtp(SmtpFailure {
            message: "connection refused".into(),
            ..Default::default()
        });
        assert_eq!(c.category(), "connection_refused");
        assert!(c.is_retryable());
    }

    #[test]
    fn transport_requires_host() {
        let config = EmailConfig::default();
        assert!(SmtpMailTransport::from_config(&config).is_err());
    }
}
