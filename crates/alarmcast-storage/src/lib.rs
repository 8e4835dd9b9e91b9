// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the alarmcast delivery engine.
//!
//! WAL-mode SQLite with embedded migrations and a single-writer model via
//! `tokio-rusqlite`. Typed query modules back [`SqliteStorage`] (alarms,
//! contacts, modems, dedup markers, dead letters, control flags) and
//! [`SqliteQueue`] (the crash-safe alarm queue).

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod queries;
pub mod queue;

pub use adapter::SqliteStorage;
pub use database::Database;
pub use queue::SqliteQueue;
