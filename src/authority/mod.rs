// src/authority/mod.rs

//! Credential authority boundary.
//!
//! The authority itself (who mints tokens, who decides whether a token
//! satisfies a named right) is an external collaborator behind the
//! [`CredentialAuthority`] trait. This module provides:
//!
//! - [`AuthorizationToken`]: the opaque blob passed between client and worker.
//! - [`AuthorityAdapter`]: the only thing the rest of the crate talks to. It
//!   maps commands to rights, mints or reuses tokens, and verifies them.
//! - [`LocalAuthority`]: a file-backed authority for Unix hosts, with
//!   rights stored in a TOML database, group-based `user` rules and keyed
//!   tokens.
//! - [`TokenIssuer`]: where a client obtains fresh tokens. Tokens are only
//!   minted inside the worker, which hosts the authority; the client asks
//!   for one over its connection.
//! - [`Prompter`]: interactive confirmation, used on the client only.
//!
//! Denial and failure are kept apart everywhere: a token that does not
//! satisfy a right yields [`Decision::Denied`], while a broken database or a
//! cancelled prompt is an [`AuthorityError`].

pub mod adapter;
pub mod local;
pub mod prompt;
pub mod token;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::{Policy, RuleClass};

pub use adapter::AuthorityAdapter;
pub use local::{load_or_create_key, AuthorityKey, LocalAuthority};
pub use prompt::{Prompter, TerminalPrompter};
pub use token::AuthorizationToken;

/// Failure of the authorization subsystem itself (as opposed to a denial).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("internal authority error: {0}")]
    Internal(String),

    #[error("authorization was cancelled by the user")]
    Canceled,

    #[error("rights database {path}: {message}")]
    Database { path: String, message: String },
}

/// Outcome of evaluating a token against a right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Granted,
    Denied,
}

impl Decision {
    pub fn is_granted(self) -> bool {
        matches!(self, Decision::Granted)
    }
}

/// The process asking for a right, as observed by the worker on the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub uid: u32,
    pub gid: u32,
    pub pid: Option<i32>,
}

/// Rule stored for a named right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RightRule {
    pub class: RuleClass,
    pub group: String,
    /// Seconds a grant is shared with other tokens of the same uid; `0` keeps
    /// it with the token that acquired it.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default = "default_rule_version")]
    pub version: u32,
}

fn default_rule_version() -> u32 {
    1
}

impl From<&Policy> for RightRule {
    fn from(policy: &Policy) -> Self {
        Self {
            class: policy.class,
            group: policy.group.to_string(),
            timeout: policy.timeout_secs,
            version: policy.version,
        }
    }
}

/// External credential authority.
///
/// Implementations may block on file IO; async callers go through
/// [`AuthorityAdapter`], which moves evaluation off the runtime.
pub trait CredentialAuthority: Send + Sync {
    /// Mint a fresh, empty authorization context for `subject`, in external
    /// form.
    fn create_empty_token(&self, subject: &Subject) -> Result<AuthorizationToken, AuthorityError>;

    /// Read the registered rule for a right, if any.
    fn right_get(&self, name: &str) -> Result<Option<RightRule>, AuthorityError>;

    /// Register or replace a right.
    fn right_set(&self, name: &str, rule: &RightRule, description: &str)
    -> Result<(), AuthorityError>;

    /// Decide whether `token`, presented by `subject`, satisfies `right`.
    /// `default_rule` applies when the right has not been registered.
    fn copy_right(
        &self,
        token: &AuthorizationToken,
        right: &str,
        default_rule: &RightRule,
        subject: &Subject,
    ) -> Result<Decision, AuthorityError>;
}

pub type IssueFuture<'a> =
    Pin<Box<dyn Future<Output = crate::errors::Result<AuthorizationToken>> + Send + 'a>>;

/// Source of fresh tokens for the calling process.
pub trait TokenIssuer: Send + Sync {
    fn issue_token(&self) -> IssueFuture<'_>;
}
