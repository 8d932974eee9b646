// src/client/install.rs

//! Privileged installation of the worker binary.
//!
//! The worker is "installed" when two files exist at privileged locations:
//! the executable itself and a registration descriptor naming it. The
//! descriptor is the source of truth for [`HelperInstallState`].
//!
//! Removal is not done here: the running worker deletes its own files in
//! response to an authorized uninstall request.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ConfigFile;
use crate::errors::{HelperError, Result};
use crate::types::{HelperInstallState, HelperVersion};

const EXECUTABLE_MODE: u32 = 0o755;

/// External collaborator that activates the bundled worker.
pub trait InstallService: Send + Sync {
    /// Copy and activate the worker identified by `tool`. `Ok(false)` means
    /// the service declined.
    fn install(&self, tool: &str) -> Result<bool>;

    /// Current install state relative to `bundled`.
    fn install_state(&self, bundled: &HelperVersion) -> Result<HelperInstallState>;
}

/// Registration descriptor written next to the installed worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledDescriptor {
    pub label: String,
    pub program: PathBuf,
    pub version: HelperVersion,
    pub socket_path: PathBuf,
}

/// Read the descriptor at `path`; `None` when it does not exist.
pub fn read_descriptor(path: &Path) -> Result<Option<InstalledDescriptor>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(toml::from_str(&contents)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Installs by copying an executable and writing a TOML descriptor.
#[derive(Debug, Clone)]
pub struct FileInstallService {
    label: String,
    source: PathBuf,
    executable_path: PathBuf,
    descriptor_path: PathBuf,
    socket_path: PathBuf,
    version: HelperVersion,
}

impl FileInstallService {
    /// Install the running executable at the locations in `config`.
    pub fn from_config(config: &ConfigFile) -> Result<Self> {
        let source = std::env::current_exe().context("locating the running executable")?;
        Ok(Self {
            label: config.helper.service_name.clone(),
            source,
            executable_path: config.install.executable_path.clone(),
            descriptor_path: config.install.descriptor_path.clone(),
            socket_path: config.helper.socket_path.clone(),
            version: HelperVersion::bundled(),
        })
    }

    /// Install `source` instead of the running executable.
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = source.into();
        self
    }

    /// Record `version` in the descriptor instead of the bundled one.
    pub fn with_version(mut self, version: HelperVersion) -> Self {
        self.version = version;
        self
    }

    fn copy_executable(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.executable_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        // Stage beside the target, then rename into place.
        let staging = self.executable_path.with_extension("new");
        fs::copy(&self.source, &staging).with_context(|| {
            format!(
                "copying {} to {}",
                self.source.display(),
                staging.display()
            )
        })?;
        fs::set_permissions(&staging, fs::Permissions::from_mode(EXECUTABLE_MODE))
            .with_context(|| format!("setting mode on {}", staging.display()))?;
        fs::rename(&staging, &self.executable_path)
            .with_context(|| format!("activating {}", self.executable_path.display()))?;
        Ok(())
    }

    fn write_descriptor(&self) -> anyhow::Result<()> {
        let descriptor = InstalledDescriptor {
            label: self.label.clone(),
            program: self.executable_path.clone(),
            version: self.version.clone(),
            socket_path: self.socket_path.clone(),
        };
        let contents = toml::to_string(&descriptor).context("serializing descriptor")?;
        if let Some(parent) = self.descriptor_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&self.descriptor_path, contents)
            .with_context(|| format!("writing {}", self.descriptor_path.display()))?;
        Ok(())
    }
}

impl InstallService for FileInstallService {
    fn install(&self, tool: &str) -> Result<bool> {
        if tool != self.label {
            warn!(tool, label = %self.label, "refusing to install unknown tool");
            return Ok(false);
        }

        self.copy_executable()
            .map_err(|e| HelperError::Install(format!("{e:#}")))?;
        self.write_descriptor()
            .map_err(|e| HelperError::Install(format!("{e:#}")))?;

        info!(
            label = %self.label,
            program = %self.executable_path.display(),
            version = %self.version,
            "worker installed"
        );
        Ok(true)
    }

    fn install_state(&self, bundled: &HelperVersion) -> Result<HelperInstallState> {
        let Some(descriptor) = read_descriptor(&self.descriptor_path)? else {
            if self.executable_path.exists() {
                debug!(
                    executable = %self.executable_path.display(),
                    "worker executable present without a descriptor"
                );
                return Ok(HelperInstallState::Stale(HelperVersion::unknown()));
            }
            debug!(path = %self.descriptor_path.display(), "no worker descriptor");
            return Ok(HelperInstallState::Absent);
        };

        if !descriptor.program.exists() {
            debug!(program = %descriptor.program.display(), "descriptor names a missing executable");
            return Ok(HelperInstallState::Stale(descriptor.version));
        }

        Ok(HelperInstallState::derive(Some(descriptor.version), bundled))
    }
}
