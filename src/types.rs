use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exit code the worker replies with when a request fails authorization.
///
/// Real process exit codes are `0..=255` (or `128 + signal`), so a caller can
/// always tell "denied" apart from "ran and exited N".
pub const AUTHORIZATION_FAILED_EXIT_CODE: i32 = -60005;

/// Exit code for a failed uninstall (either deletion failed).
pub const UNINSTALL_FAILED_EXIT_CODE: i32 = -1;

/// Version string baked into this build. The client compares it against the
/// installed worker's descriptor; the worker reports it from `get_version`.
pub const BUNDLED_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Which output stream of a child process a chunk of text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// Version of a worker binary, as recorded in its registration descriptor or
/// reported over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HelperVersion(String);

impl HelperVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// The version this binary carries.
    pub fn bundled() -> Self {
        Self(BUNDLED_VERSION.to_string())
    }

    /// Placeholder for an installed worker whose version cannot be read.
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HelperVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the privileged worker is present and matches the bundled build.
///
/// Derived on demand from what is on disk; never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperInstallState {
    Absent,
    Stale(HelperVersion),
    Current,
}

impl HelperInstallState {
    /// Derive the state from the installed version (if any).
    pub fn derive(installed: Option<HelperVersion>, bundled: &HelperVersion) -> Self {
        match installed {
            None => HelperInstallState::Absent,
            Some(v) if &v == bundled => HelperInstallState::Current,
            Some(v) => HelperInstallState::Stale(v),
        }
    }

    pub fn is_current(&self) -> bool {
        matches!(self, HelperInstallState::Current)
    }
}

impl fmt::Display for HelperInstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HelperInstallState::Absent => f.write_str("absent"),
            HelperInstallState::Stale(v) => write!(f, "stale (installed {v})"),
            HelperInstallState::Current => f.write_str("current"),
        }
    }
}

/// A duration written in config files as `"250ms"`, `"1s"`, `"2m"` or `"1h"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigDuration(pub Duration);

impl FromStr for ConfigDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(ConfigDuration)
    }
}

impl<'de> Deserialize<'de> for ConfigDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Units accepted in config durations, with their length in milliseconds.
const DURATION_UNITS: [(&str, u64); 4] = [
    ("ms", 1),
    ("s", 1_000),
    ("m", 60_000),
    ("h", 3_600_000),
];

/// Parse a config duration: an unsigned integer directly followed by one of
/// `ms`, `s`, `m`, `h`. Values that do not fit in a `u64` of milliseconds
/// are an error.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (number, unit) = s.split_at(digits_end);

    if number.is_empty() {
        return Err(format!("duration '{s}' must start with a number"));
    }
    if unit.is_empty() {
        return Err(format!("duration '{s}' has no unit (ms, s, m or h)"));
    }

    let unit = unit.trim().to_ascii_lowercase();
    let millis_per_unit = DURATION_UNITS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, millis)| *millis)
        .ok_or_else(|| format!("duration '{s}' has unknown unit '{unit}' (ms, s, m or h)"))?;

    let value: u64 = number.parse().map_err(|e| format!("duration '{s}': {e}"))?;
    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
