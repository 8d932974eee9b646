use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use privhelper::client::InstallService;
use privhelper::errors::Result;
use privhelper::types::{HelperInstallState, HelperVersion};

/// Install service that only keeps the "installed version" in memory.
pub struct FakeInstallService {
    installs_version: HelperVersion,
    installed: Mutex<Option<HelperVersion>>,
    installs: AtomicUsize,
}

impl FakeInstallService {
    /// `install` will record `version` as installed.
    pub fn new(version: HelperVersion) -> Self {
        Self {
            installs_version: version,
            installed: Mutex::new(None),
            installs: AtomicUsize::new(0),
        }
    }

    pub fn set_installed(&self, version: Option<HelperVersion>) {
        *self.installed.lock().unwrap() = version;
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

impl InstallService for FakeInstallService {
    fn install(&self, _tool: &str) -> Result<bool> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.set_installed(Some(self.installs_version.clone()));
        Ok(true)
    }

    fn install_state(&self, bundled: &HelperVersion) -> Result<HelperInstallState> {
        Ok(HelperInstallState::derive(
            self.installed.lock().unwrap().clone(),
            bundled,
        ))
    }
}
