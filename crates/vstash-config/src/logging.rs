//! Structured logging utilities for vstash components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use vstash_config::log_upload_info;
//!
//! log_upload_info!("UPLOAD_SUCCESS", origin = "203.0.113.7", fingerprint = "1f3a9c0b2d4e");
//! ```

use std::str::FromStr;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{path, ConfigError, LoggingConfig};

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const DAEMON: &'static str = "DAEMON";
    pub const UPLOAD: &'static str = "UPLOAD";
    pub const FETCH: &'static str = "FETCH";
    pub const CACHE: &'static str = "CACHE";
    pub const AUTH: &'static str = "AUTH";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ConfigError::Invalid(format!("unknown log level {:?}", other))),
        }
    }
}

// === DAEMON logging macros ===

#[macro_export]
macro_rules! log_daemon_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "DAEMON", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_daemon_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "DAEMON", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_daemon_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "DAEMON", $($key = $value,)* $msg)
    };
}

// === UPLOAD logging macros ===

#[macro_export]
macro_rules! log_upload_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "UPLOAD", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_upload_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "UPLOAD", $($key = $value,)* $msg)
    };
}

// === FETCH logging macros ===

#[macro_export]
macro_rules! log_fetch_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "FETCH", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_fetch_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "FETCH", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_fetch_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "FETCH", $($key = $value,)* $msg)
    };
}

// === CACHE logging macros ===

#[macro_export]
macro_rules! log_cache_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CACHE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cache_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "CACHE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cache_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CACHE", $($key = $value,)* $msg)
    };
}

// === AUTH logging macros ===

#[macro_export]
macro_rules! log_auth_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "AUTH", $($key = $value,)* $msg)
    };
}

/// Initialize logging from config.
/// Call this once at application startup and keep the returned guard alive
/// for as long as file logging should be flushed.
///
/// `RUST_LOG` takes precedence over `config.level`. When `config.dir` is
/// set, events are also written to a daily-rotated `vstash.log.<date>` file
/// in that directory.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, ConfigError> {
    let level: LogLevel = config.level.parse()?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            let dir = path::ensure_dir(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "vstash.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::DAEMON, "DAEMON");
        assert_eq!(Component::UPLOAD, "UPLOAD");
        assert_eq!(Component::CACHE, "CACHE");
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_macros_expand() {
        let fingerprint = "1f3a9c0b2d4e";
        log_upload_info!("UPLOAD_SUCCESS", origin = "127.0.0.1", fingerprint = fingerprint);
        log_cache_warn!("cache unavailable");
    }
}
