// src/worker/uninstall.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::InstallSection;

/// Result of removing one installed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub path: PathBuf,
    pub error: Option<String>,
}

impl Removal {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of an uninstall. Only a complete removal counts as success: a
/// worker with one of its two files left behind is still installed, just
/// broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallReport {
    pub executable: Removal,
    pub descriptor: Removal,
}

impl UninstallReport {
    pub fn is_complete(&self) -> bool {
        self.executable.succeeded() && self.descriptor.succeeded()
    }
}

/// Delete the installed executable and its registration descriptor.
///
/// Both deletions are always attempted, even if the first one fails.
pub fn remove_installed(paths: &InstallSection) -> UninstallReport {
    UninstallReport {
        executable: remove_file(&paths.executable_path),
        descriptor: remove_file(&paths.descriptor_path),
    }
}

fn remove_file(path: &Path) -> Removal {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "removed installed file");
            Removal {
                path: path.to_path_buf(),
                error: None,
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove installed file");
            Removal {
                path: path.to_path_buf(),
                error: Some(e.to_string()),
            }
        }
    }
}
