#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::unistd::{Gid, Group};
use privhelper::config::{
    AuthoritySection, ConfigFile, HelperSection, IdentitySection, InstallSection,
};
use privhelper::registry::RuleClass;
use privhelper::types::ConfigDuration;
use tempfile::TempDir;

/// Builder for `ConfigFile` with every path inside a private temp directory.
///
/// The directory lives as long as the builder's [`TestEnv`].
pub struct ConfigFileBuilder {
    config: ConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(root: &Path) -> Self {
        Self {
            config: ConfigFile {
                helper: HelperSection {
                    service_name: "io.privhelper.test".to_string(),
                    socket_path: root.join("worker.sock"),
                    poll_interval: ConfigDuration(Duration::from_millis(50)),
                },
                install: InstallSection {
                    executable_path: root.join("libexec/privhelper-worker"),
                    descriptor_path: root.join("etc/worker.toml"),
                },
                authority: AuthoritySection {
                    rights_path: root.join("etc/rights.toml"),
                    key_path: root.join("etc/authority.key"),
                    interactive: false,
                },
                identity: IdentitySection::default(),
            },
        }
    }

    pub fn service_name(mut self, name: &str) -> Self {
        self.config.helper.service_name = name.to_string();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.helper.poll_interval = ConfigDuration(interval);
        self
    }

    pub fn trusted_digest(mut self, digest: &str) -> Self {
        self.config.identity.trusted_digests.push(digest.to_string());
        self
    }

    pub fn build(self) -> ConfigFile {
        self.config
    }
}

/// A temp directory plus a config rooted in it.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: ConfigFile,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with(|b| b)
    }

    /// Customise the config before it is built.
    pub fn with(customise: impl FnOnce(ConfigFileBuilder) -> ConfigFileBuilder) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = customise(ConfigFileBuilder::new(dir.path())).build();
        Self { dir, config }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a rights database containing one right.
    pub fn write_right(&self, name: &str, class: RuleClass, group: &str, timeout: u64) {
        let class = match class {
            RuleClass::Allow => "allow",
            RuleClass::Deny => "deny",
            RuleClass::User => "user",
        };
        let contents = format!(
            "[right.\"{name}\"]\nclass = \"{class}\"\ngroup = \"{group}\"\ntimeout = {timeout}\nversion = 1\n"
        );
        let path = &self.config.authority.rights_path;
        fs::create_dir_all(path.parent().expect("rights path has a parent"))
            .expect("create rights dir");
        fs::write(path, contents).expect("write rights database");
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Name of the current process's primary group, so `user` rules can be
/// satisfied without root.
pub fn current_group_name() -> String {
    Group::from_gid(Gid::current())
        .ok()
        .flatten()
        .map(|g| g.name)
        .expect("current gid has a group entry")
}
