// src/logging.rs

//! Log output for both the client and the worker, on stderr.
//!
//! The `--log-level` flag wins, then `PRIVHELPER_LOG`. The variable takes
//! either a bare level (`debug`, `warning`) or a full filter directive set
//! such as `privhelper::worker=trace`. A bare level applies to this crate
//! only; dependencies stay at `warn`. The worker usually runs under a
//! service manager with stderr going to a journal, so colour is only used
//! on a terminal.

use std::io::IsTerminal;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "PRIVHELPER_LOG";

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref());
    let stderr = std::io::stderr();

    fmt()
        .with_env_filter(filter)
        .with_ansi(stderr.is_terminal())
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

/// Effective level for this crate: the flag, then a bare level in the
/// environment, then `info`.
pub fn resolve_level(cli_level: Option<LogLevel>, env_value: Option<&str>) -> Level {
    cli_level
        .map(Level::from)
        .or_else(|| env_value.and_then(parse_level))
        .unwrap_or(Level::INFO)
}

/// Filter for [`init_logging`]. A directive set in the environment is used
/// verbatim unless the flag overrides it.
pub fn build_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    if cli_level.is_none() {
        let directives = env_value.filter(|v| v.contains('='));
        if let Some(filter) = directives.and_then(|v| EnvFilter::try_new(v).ok()) {
            return filter;
        }
    }

    let level = resolve_level(cli_level, env_value).as_str().to_ascii_lowercase();
    EnvFilter::new(format!("warn,{}={level}", env!("CARGO_CRATE_NAME")))
}

fn parse_level(value: &str) -> Option<Level> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("warning") {
        return Some(Level::WARN);
    }
    Level::from_str(value).ok()
}
