// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded database migrations using refinery.
//!
//! SQL files under `migrations/` are compiled into the binary and applied
//! when the database is opened.

use alarmcast_core::AlarmcastError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Apply all pending migrations. Returns how many were applied.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<usize, AlarmcastError> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(|e| AlarmcastError::Storage {
            source: Box::new(e),
        })?;
    Ok(report.applied_migrations().len())
}
