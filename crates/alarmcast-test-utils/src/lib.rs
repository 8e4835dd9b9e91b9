// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for alarmcast integration tests.
//!
//! Provides in-memory adapters and fixtures for fast, deterministic,
//! CI-runnable tests without providers, modems, or a database.
//!
//! # Components
//!
//! - [`MemoryStore`] - every storage trait behind one mutex
//! - [`MemoryQueue`] - lease-based queue driven by tokio time
//! - [`ScriptedSender`] - channel sender replaying a script of outcomes
//! - [`TestHarness`] - SQLite storage and queue in a temp directory
//! - [`alarm`] / [`contact`] - fixtures for one device

pub mod fixtures;
pub mod harness;
pub mod memory_queue;
pub mod memory_store;
pub mod mock_sender;

pub use fixtures::{alarm, contact, IMEI};
pub use harness::TestHarness;
pub use memory_queue::{MemoryQueue, MessageState};
pub use memory_store::MemoryStore;
pub use mock_sender::{ScriptedSender, SendCall, Step};
