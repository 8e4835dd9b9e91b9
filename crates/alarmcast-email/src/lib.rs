// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Email channel for the alarmcast delivery engine.
//!
//! [`EmailSender`] renders alarms to plain-text mail and delivers them
//! through a [`MailTransport`]; [`SmtpMailTransport`] is the lettre-backed
//! implementation.

pub mod sender;
pub mod transport;

pub use sender::EmailSender;
pub use transport::{classify_smtp, MailTransport, SmtpFailure, SmtpMailTransport};

/// Breaker name for an SMTP relay.
pub fn breaker_name(host: &str) -> String {
    format!("email:{host}")
}
