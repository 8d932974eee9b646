// src/client/token_file.rs

//! Caller-held token cache.
//!
//! A token is kept hex-encoded in a file only its owner can read, so that a
//! later invocation can replay it instead of minting (and prompting) again.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use crate::authority::AuthorizationToken;
use crate::errors::{HelperError, Result};

const TOKEN_FILE_MODE: u32 = 0o600;

pub fn store(path: &Path, token: &AuthorizationToken) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(TOKEN_FILE_MODE)
        .open(path)?;
    // `mode` only applies on creation.
    fs::set_permissions(path, fs::Permissions::from_mode(TOKEN_FILE_MODE))?;
    writeln!(file, "{}", token.to_hex())?;
    Ok(())
}

/// Load a stored token; `None` when the file does not exist.
pub fn load(path: &Path) -> Result<Option<AuthorizationToken>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    AuthorizationToken::from_hex(contents.trim())
        .map(Some)
        .map_err(|e| HelperError::Config(format!("token file {}: {e}", path.display())))
}

/// Delete a stored token. Returns whether there was one.
pub fn forget(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
