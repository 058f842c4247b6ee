//! Logging setup
//!
//! Everything in the crate logs through `tracing`. The binary installs a
//! subscriber that writes human-readable lines to stderr and, optionally, a
//! plain-text copy to `usntrace.log` next to the executable (truncated on
//! every run). `USNTRACE_LOG` overrides the level filter.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Environment variable consulted for a filter directive
pub const LOG_ENV_VAR: &str = "USNTRACE_LOG";

/// Map a `-v` count to a default filter directive
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "usntrace=warn",
        1 => "usntrace=info",
        2 => "usntrace=debug",
        _ => "usntrace=trace",
    }
}

/// Get the log file path (same directory as executable)
pub fn get_log_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("usntrace.log")
}

fn open_log_file() -> Option<File> {
    let log_path = get_log_path();
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path)
        .ok();

    if file.is_some() {
        eprintln!("[usntrace] Logging to: {}", log_path.display());
    }
    file
}

/// Initialize the global subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(verbosity: u8, log_to_file: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let file_layer = if log_to_file {
        open_log_file().map(|file| {
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
        })
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}
