// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the alarmcast delivery engine.
//!
//! This crate provides the error taxonomy, the pure error classifier, the
//! domain types shared by every other crate, and the trait seams behind which
//! storage, queues, and channel senders plug in.

pub mod classify;
pub mod error;
pub mod message;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use classify::{
    classify, classify_response, parse_retry_after, ProviderFailure, BOUNCE_CATEGORY,
};
pub use error::{AlarmcastError, ClassifiedError, ErrorContext, ErrorKind, Severity};
pub use types::{
    Alarm, Channel, Contact, DeadLetterItem, DeliveryAttemptResult, FailureRecord, HealthStatus,
    Modem, ModemHealth, ModemPackage, QuietHours, RecipientOutcome, ServiceTag, WorkerRecord,
    WorkerStatus,
};

pub use traits::{
    AlarmQueue, AlarmStore, ChannelSender, ControlState, DeadLetterStore, ModemStore,
    PluginAdapter, QueueMessage,
};
