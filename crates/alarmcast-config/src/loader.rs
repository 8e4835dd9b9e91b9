// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./alarmcast.toml` > `~/.config/alarmcast/alarmcast.toml` >
//! `/etc/alarmcast/alarmcast.toml` with environment variable overrides via `ALARMCAST_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::AlarmcastConfig;

/// Top-level sections, used to map env var names onto dotted keys.
pub const SECTIONS: [&str; 13] = [
    "service",
    "storage",
    "queue",
    "processor",
    "breaker",
    "modem_pool",
    "dead_letter",
    "workers",
    "email",
    "sms",
    "voice",
    "push",
    "metrics",
];

pub const SYSTEM_CONFIG_PATH: &str = "/etc/alarmcast/alarmcast.toml";
pub const LOCAL_CONFIG_PATH: &str = "alarmcast.toml";

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/alarmcast/alarmcast.toml` (system-wide)
/// 3. `~/.config/alarmcast/alarmcast.toml` (user XDG config)
/// 4. `./alarmcast.toml` (local directory)
/// 5. `ALARMCAST_*` environment variables
pub fn load_config() -> Result<AlarmcastConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<AlarmcastConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AlarmcastConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<AlarmcastConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AlarmcastConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used for config loading.
///
/// Returns the Figment before extraction so callers can inspect metadata.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(AlarmcastConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_PATH))
        .merge(env_provider())
}

/// `~/.config/alarmcast/alarmcast.toml`, when a config dir is known.
pub fn user_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("alarmcast").join("alarmcast.toml"))
}

/// Map a lowercased, prefix-stripped env var name onto a dotted key.
///
/// Uses the known section list rather than splitting on `_`, so
/// `ALARMCAST_MODEM_POOL_UNHEALTHY_AFTER_FAILURES` maps to
/// `modem_pool.unhealthy_after_failures`.
pub fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

fn env_provider() -> Env {
    Env::prefixed("ALARMCAST_").map(|key| map_env_key(key.as_str()).into())
}
