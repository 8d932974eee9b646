// src/protocol/messages.rs

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::authority::AuthorizationToken;
use crate::registry::CommandId;
use crate::types::{HelperVersion, StreamKind};

/// Client → worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
    GetVersion,
    /// Mint an empty authorization token bound to the connection's peer uid.
    CreateToken,
    /// Run an allow-listed command. `token` is only consulted when the
    /// command's policy requires authorization.
    RunCommand {
        command: CommandId,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        token: Option<AuthorizationToken>,
    },
    RunUninstall {
        token: AuthorizationToken,
    },
}

impl RequestBody {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestBody::GetVersion => "get_version",
            RequestBody::CreateToken => "create_token",
            RequestBody::RunCommand { .. } => "run_command",
            RequestBody::RunUninstall { .. } => "run_uninstall",
        }
    }
}

/// Worker → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Reply { id: u64, reply: Reply },
    Log { stream: StreamKind, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Reply {
    Version { version: HelperVersion },
    Token { token: AuthorizationToken },
    /// Process exit code, or one of the reserved codes in [`crate::types`].
    Exit { code: i32 },
    Error { error: RemoteError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The credential authority failed (not a denial).
    Authorization,
    /// The executable could not be started.
    Spawn,
    /// Unknown command shape, wrong arity, rejected argument.
    InvalidRequest,
    Internal,
}

/// Error reported by the worker in place of an exit code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}
