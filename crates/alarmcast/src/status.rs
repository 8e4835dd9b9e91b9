// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `alarmcast status` command implementation.
//!
//! Reads the shared SQLite database directly: the paused flag, queue counts
//! by status, dead-letter size, and per-modem usage. Works whether or not a
//! `serve` process is running.

use std::io::IsTerminal;

use alarmcast_config::model::AlarmcastConfig;
use alarmcast_core::{AlarmQueue, AlarmcastError, ControlState, DeadLetterStore, Modem, ModemStore};
use alarmcast_storage::{SqliteQueue, SqliteStorage};
use serde::Serialize;

/// Per-modem line of the status output.
#[derive(Debug, Serialize)]
pub struct ModemUsage {
    pub id: String,
    pub enabled: bool,
    pub health: String,
    pub sent_count: u64,
    pub sent_limit: Option<u64>,
}

impl From<&Modem> for ModemUsage {
    fn from(m: &Modem) -> Self {
        Self {
            id: m.id.clone(),
            enabled: m.enabled,
            health: m.health.to_string(),
            sent_count: m.sent_count,
            sent_limit: m.sent_limit,
        }
    }
}

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub paused: bool,
    pub queue_depth: u64,
    pub queue_by_status: Vec<(String, u64)>,
    pub dead_letters: u64,
    pub modems: Vec<ModemUsage>,
}

/// Run the `alarmcast status` command.
pub async fn run_status(
    config: &AlarmcastConfig,
    json: bool,
    plain: bool,
) -> Result<(), AlarmcastError> {
    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    let queue = SqliteQueue::from_config(storage.database()?.clone(), &config.queue);

    let status = StatusResponse {
        paused: storage.is_paused().await?,
        queue_depth: queue.depth().await?,
        queue_by_status: queue.counts().await?,
        dead_letters: storage.dead_letter_count().await?,
        modems: storage.list_modems().await?.iter().map(ModemUsage::from).collect(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print_status(&status, use_color);
    }
    Ok(())
}

fn usage_line(m: &ModemUsage) -> String {
    let limit = m
        .sent_limit
        .map(|l| l.to_string())
        .unwrap_or_else(|| "unlimited".to_string());
    let state = if m.enabled { m.health.as_str() } else { "disabled" };
    format!("{:<16} {:>8} / {:<10} {}", m.id, m.sent_count, limit, state)
}

fn print_status(status: &StatusResponse, use_color: bool) {
    println!();
    println!("  alarmcast status");
    println!("  {}", "-".repeat(35));

    let consumption = if status.paused { "paused" } else { "running" };
    if use_color {
        use colored::Colorize;
        let state = if status.paused {
            consumption.yellow()
        } else {
            consumption.green()
        };
        println!("    Consumer:     {state}");
    } else {
        println!("    Consumer:     {consumption}");
    }
    println!("    Queue depth:  {}", status.queue_depth);
    for (state, count) in &status.queue_by_status {
        println!("      {state:<12} {count}");
    }
    println!("    Dead letters: {}", status.dead_letters);

    if !status.modems.is_empty() {
        println!();
        println!("    Modems:");
        for m in &status.modems {
            let line = usage_line(m);
            if use_color && m.health != "healthy" {
                use colored::Colorize;
                println!("      {}", line.red());
            } else {
                println!("      {line}");
            }
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(enabled: bool, limit: Option<u64>) -> ModemUsage {
        ModemUsage {
            id: "m1".into(),
            enabled,
            health: "degraded".into(),
            sent_count: 12,
            sent_limit: limit,
        }
    }

    #[test]
    fn usage_line_shows_limit_and_health() {
        let line = usage_line(&usage(true, Some(100)));
        assert!(line.contains("12"));
        assert!(line.contains("100"));
        assert!(line.ends_with("degraded"));
        assert!(usage_line(&usage(true, None)).contains("unlimited"));
        assert!(usage_line(&usage(false, None)).ends_with("disabled"));
    }

    #[test]
    fn status_response_serializes() {
        let resp = StatusResponse {
            paused: true,
            queue_depth: 3,
            queue_by_status: vec![("pending".into(), 3)],
            dead_letters: 1,
            modems: vec![usage(true, None)],
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"paused\":true"));
        assert!(json.contains("\"sent_limit\":null"));
    }
}
