// src/config/validate.rs

use std::path::Path;

use anyhow::{anyhow, Result};

use crate::config::model::ConfigFile;

/// Run semantic validation against a loaded configuration.
///
/// This checks:
/// - `service_name` is non-empty and limited to `[A-Za-z0-9._-]`
/// - every configured path is absolute
/// - `poll_interval` is non-zero
/// - every trusted digest is a 64-char hex blake3 digest
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    validate_service_name(&cfg.helper.service_name)?;
    validate_paths(cfg)?;

    if cfg.helper.poll_interval().is_zero() {
        return Err(anyhow!("[helper].poll_interval must be greater than zero"));
    }

    validate_digests(&cfg.identity.trusted_digests)?;
    Ok(())
}

fn validate_service_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!("[helper].service_name must not be empty"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
    {
        return Err(anyhow!(
            "[helper].service_name contains invalid character '{}'",
            bad
        ));
    }
    Ok(())
}

fn validate_paths(cfg: &ConfigFile) -> Result<()> {
    let paths: [(&str, &Path); 5] = [
        ("[helper].socket_path", &cfg.helper.socket_path),
        ("[install].executable_path", &cfg.install.executable_path),
        ("[install].descriptor_path", &cfg.install.descriptor_path),
        ("[authority].rights_path", &cfg.authority.rights_path),
        ("[authority].key_path", &cfg.authority.key_path),
    ];

    for (key, path) in paths {
        if !path.is_absolute() {
            return Err(anyhow!("{} must be an absolute path (got {:?})", key, path));
        }
    }
    Ok(())
}

fn validate_digests(digests: &[String]) -> Result<()> {
    for digest in digests {
        let well_formed = digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit());
        if !well_formed {
            return Err(anyhow!(
                "[identity].trusted_digests entry '{}' is not a 64-char hex blake3 digest",
                digest
            ));
        }
    }
    Ok(())
}
