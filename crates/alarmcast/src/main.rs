// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Alarmcast - resilient multi-channel alarm delivery.
//!
//! This is the binary entry point for the delivery engine.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod enqueue;
mod serve;
mod status;

use std::path::PathBuf;

use alarmcast_config::model::ServiceConfig;
use clap::{Parser, Subcommand};

/// Alarmcast - resilient multi-channel alarm delivery.
#[derive(Parser, Debug)]
#[command(name = "alarmcast", version, about, long_about = None)]
struct Cli {
    /// Configuration file. Defaults to the standard search path.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the delivery engine until SIGINT or SIGTERM.
    Serve,
    /// Show the paused flag, queue depth, dead letters, and modem usage.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
        /// Disable colors.
        #[arg(long)]
        plain: bool,
    },
    /// Push a JSON alarm onto the queue.
    Enqueue {
        /// File holding one alarm as JSON.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => alarmcast_config::load_and_validate_path(path),
        None => alarmcast_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            alarmcast_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.service);

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Status { json, plain }) => status::run_status(&config, json, plain).await,
        Some(Commands::Enqueue { file }) => enqueue::run_enqueue(&config, &file).await,
        None => {
            println!("alarmcast: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Filter from `RUST_LOG`, else `alarmcast=<level>,warn`; JSON lines when
/// `service.log_format = "json"`.
fn init_tracing(service: &ServiceConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directive(&service.log_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr);
    if service.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn log_directive(level: &str) -> String {
    format!("alarmcast={level},warn")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn enqueue_takes_a_file_and_a_global_config() {
        let cli = Cli::parse_from(["alarmcast", "enqueue", "alarm.json", "-c", "a.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));
        assert!(matches!(cli.command, Some(Commands::Enqueue { file }) if file == PathBuf::from("alarm.json")));
    }

    #[test]
    fn default_log_directive_scopes_to_the_crate() {
        assert_eq!(log_directive("debug"), "alarmcast=debug,warn");
    }
}
