// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! The variants follow the failure classes a caller has to tell apart:
//! connection problems are recoverable by reconnecting, a command the
//! worker could not start is reported apart from its exit code, and
//! authorization is split into "denied" (the policy was not satisfied)
//! versus [`AuthorityError`] (the credential subsystem itself failed).

use thiserror::Error;

use crate::authority::AuthorityError;
use crate::protocol::{FrameError, RemoteError};

#[derive(Error, Debug)]
pub enum HelperError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authorization subsystem error: {0}")]
    Authority(#[from] AuthorityError),

    #[error("Authorization denied")]
    AuthorizationDenied,

    #[error("Worker could not start the command: {0}")]
    Spawn(String),

    #[error("Worker reported an error: {0}")]
    Remote(RemoteError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Privileged worker is not installed")]
    NotInstalled,

    #[error("Install error: {0}")]
    Install(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for HelperError {
    fn from(err: serde_json::Error) -> Self {
        HelperError::Protocol(err.to_string())
    }
}

impl From<FrameError> for HelperError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => HelperError::Connection(e.to_string()),
            other => HelperError::Protocol(other.to_string()),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, HelperError>;
