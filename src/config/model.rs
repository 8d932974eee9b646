// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::ConfigDuration;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [helper]
/// service_name = "io.privhelper.worker"
/// socket_path = "/var/run/privhelper.sock"
/// poll_interval = "1s"
///
/// [install]
/// executable_path = "/usr/local/libexec/privhelper-worker"
/// descriptor_path = "/etc/privhelper/worker.toml"
///
/// [authority]
/// rights_path = "/etc/privhelper/rights.toml"
/// key_path = "/etc/privhelper/authority.key"
///
/// [identity]
/// trusted_digests = []
/// ```
///
/// All sections are optional and have defaults, so an empty file (or no
/// file at all) yields a usable configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub helper: HelperSection,

    #[serde(default)]
    pub install: InstallSection,

    #[serde(default)]
    pub authority: AuthoritySection,

    #[serde(default)]
    pub identity: IdentitySection,
}

/// `[helper]` section: how the worker is reached and how it idles.
#[derive(Debug, Clone, Deserialize)]
pub struct HelperSection {
    /// Label of the worker. Also the prefix of every authorization right
    /// name (`<service_name>.<command>`).
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Unix socket the worker listens on.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// How often the worker's main loop checks the shutdown flag.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: ConfigDuration,
}

impl HelperSection {
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.0
    }
}

fn default_service_name() -> String {
    "io.privhelper.worker".to_string()
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/privhelper.sock")
}

fn default_poll_interval() -> ConfigDuration {
    ConfigDuration(Duration::from_secs(1))
}

impl Default for HelperSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            socket_path: default_socket_path(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// `[install]` section: privileged locations of the installed worker.
#[derive(Debug, Clone, Deserialize)]
pub struct InstallSection {
    /// Where the worker executable is copied to.
    #[serde(default = "default_executable_path")]
    pub executable_path: PathBuf,

    /// Where the registration descriptor (label, program, version) lives.
    #[serde(default = "default_descriptor_path")]
    pub descriptor_path: PathBuf,
}

fn default_executable_path() -> PathBuf {
    PathBuf::from("/usr/local/libexec/privhelper-worker")
}

fn default_descriptor_path() -> PathBuf {
    PathBuf::from("/etc/privhelper/worker.toml")
}

impl Default for InstallSection {
    fn default() -> Self {
        Self {
            executable_path: default_executable_path(),
            descriptor_path: default_descriptor_path(),
        }
    }
}

/// `[authority]` section: the local credential authority backend.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthoritySection {
    /// TOML rights database.
    #[serde(default = "default_rights_path")]
    pub rights_path: PathBuf,

    /// Secret the worker signs tokens with. Created on first start.
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,

    /// Ask on the client's terminal before requesting a token or
    /// registering rights.
    #[serde(default)]
    pub interactive: bool,
}

fn default_rights_path() -> PathBuf {
    PathBuf::from("/etc/privhelper/rights.toml")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("/etc/privhelper/authority.key")
}

impl Default for AuthoritySection {
    fn default() -> Self {
        Self {
            rights_path: default_rights_path(),
            key_path: default_key_path(),
            interactive: false,
        }
    }
}

/// `[identity]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct IdentitySection {
    /// Extra blake3 digests (hex) of client executables allowed to connect,
    /// on top of the worker's own executable.
    #[serde(default)]
    pub trusted_digests: Vec<String>,
}
