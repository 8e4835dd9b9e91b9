// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams of the delivery engine.
//!
//! All adapters extend the [`PluginAdapter`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod channel;
pub mod queue;
pub mod storage;

pub use adapter::PluginAdapter;
pub use channel::ChannelSender;
pub use queue::{AlarmQueue, QueueMessage};
pub use storage::{AlarmStore, ControlState, DeadLetterStore, ModemStore};
