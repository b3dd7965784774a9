// src/core/logging.rs

//! Process-wide logging for embedders.
//!
//! The subscriber is installed at most once per process. Later `init` calls
//! leave it untouched and report the level already in effect. The filter sits
//! behind a reload layer so the level can be changed, or output silenced, at
//! runtime.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use strum_macros::{Display, FromRepr};
use tracing_subscriber::{EnvFilter, Registry, filter, prelude::*, reload};

/// Log severities as exchanged over the C ABI.
#[repr(u32)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, FromRepr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
    Off = 5,
}

impl Level {
    /// The `EnvFilter` directive for this level.
    pub fn directive(&self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
            Level::Off => "off",
        }
    }
}

impl From<Level> for filter::LevelFilter {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => filter::LevelFilter::ERROR,
            Level::Warn => filter::LevelFilter::WARN,
            Level::Info => filter::LevelFilter::INFO,
            Level::Debug => filter::LevelFilter::DEBUG,
            Level::Trace => filter::LevelFilter::TRACE,
            Level::Off => filter::LevelFilter::OFF,
        }
    }
}

struct LoggerState {
    level: Mutex<Level>,
    reload_handle: reload::Handle<EnvFilter, Registry>,
}

static LOGGER: OnceCell<LoggerState> = OnceCell::new();

/// The level used when `init` is called without one.
pub const DEFAULT_LEVEL: Level = Level::Warn;

/// Installs the global subscriber, writing to `file` (appending) or stderr.
///
/// Returns the level in effect. `RUST_LOG`, when set, overrides the filter
/// directive but not the reported level.
pub fn init(level: Option<Level>, file: Option<&str>) -> Level {
    let state = LOGGER.get_or_init(|| install(level.unwrap_or(DEFAULT_LEVEL), file));
    *state.level.lock()
}

fn install(level: Level, file: Option<&str>) -> LoggerState {
    let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| level.directive().to_string());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(directive));

    let log_file = file.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("Failed to open log file '{path}': {e}. Logging to stderr."))
            .ok()
    });

    let installed = match log_file {
        Some(log_file) => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(log_file)),
            )
            .try_init(),
        None => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    if let Err(e) = installed {
        eprintln!("A global tracing subscriber is already installed: {e}");
    }

    LoggerState {
        level: Mutex::new(level),
        reload_handle,
    }
}

/// Emits a host-originated message. A no-op before `init` or at `Level::Off`.
pub fn log(level: Level, identifier: &str, message: &str) {
    match level {
        Level::Error => tracing::error!(identifier, "{message}"),
        Level::Warn => tracing::warn!(identifier, "{message}"),
        Level::Info => tracing::info!(identifier, "{message}"),
        Level::Debug => tracing::debug!(identifier, "{message}"),
        Level::Trace => tracing::trace!(identifier, "{message}"),
        Level::Off => {}
    }
}

/// Changes the active level. Returns `false` if logging was never initialized.
pub fn set_level(level: Level) -> bool {
    let Some(state) = LOGGER.get() else {
        return false;
    };
    if state
        .reload_handle
        .reload(EnvFilter::new(level.directive()))
        .is_err()
    {
        return false;
    }
    *state.level.lock() = level;
    true
}

/// Silences all output.
pub fn shutdown() {
    set_level(Level::Off);
}

/// The level in effect, or `None` before `init`.
pub fn current_level() -> Option<Level> {
    LOGGER.get().map(|state| *state.level.lock())
}
