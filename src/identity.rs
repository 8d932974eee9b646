// src/identity.rs

//! Peer identity of a socket connection and its verification.
//!
//! The worker only talks to callers built from the same code as itself.
//! "Same code" is decided by the blake3 digest of the peer's executable:
//! it must equal the worker's own digest, or one of the configured trusted
//! digests. Anything that prevents computing the digest is a verification
//! error, and the connection is refused.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use blake3::Hasher;
use thiserror::Error;
use tokio::net::UnixStream;
use tracing::debug;

use crate::authority::Subject;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("peer process id is not available")]
    MissingPid,

    #[error("peer executable lookup is not supported on this platform")]
    Unsupported,

    #[error("reading executable {path:?}: {source}")]
    Executable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("reading peer credentials: {0}")]
    Credentials(#[source] io::Error),
}

/// Credentials of the process on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerIdentity {
    pub pid: Option<i32>,
    pub uid: u32,
    pub gid: u32,
}

impl PeerIdentity {
    /// Read the peer credentials the kernel recorded for `stream`.
    pub fn from_stream(stream: &UnixStream) -> Result<Self, IdentityError> {
        let cred = stream.peer_cred().map_err(IdentityError::Credentials)?;
        Ok(Self {
            pid: cred.pid(),
            uid: cred.uid(),
            gid: cred.gid(),
        })
    }

    /// The peer as seen by the credential authority.
    pub fn subject(&self) -> Subject {
        Subject {
            uid: self.uid,
            gid: self.gid,
            pid: self.pid,
        }
    }
}

/// Decides whether a connecting peer may talk to the worker.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, peer: &PeerIdentity) -> Result<bool, IdentityError>;
}

/// Accepts peers whose executable digest is in a trusted set that always
/// contains the verifier's own executable.
#[derive(Debug, Clone)]
pub struct CodeIdentityVerifier {
    trusted: HashSet<String>,
}

impl CodeIdentityVerifier {
    /// Trust the running executable plus `extra` digests.
    pub fn for_current_exe(extra: &[String]) -> Result<Self, IdentityError> {
        let exe = std::env::current_exe().map_err(|source| IdentityError::Executable {
            path: PathBuf::from("<current exe>"),
            source,
        })?;
        let own = executable_digest(&exe)?;
        debug!(digest = %own, exe = %exe.display(), "worker executable digest");
        Ok(Self::with_digests(std::iter::once(own).chain(extra.iter().cloned())))
    }

    pub fn with_digests(digests: impl IntoIterator<Item = String>) -> Self {
        Self {
            trusted: digests.into_iter().map(|d| d.to_lowercase()).collect(),
        }
    }
}

impl IdentityVerifier for CodeIdentityVerifier {
    fn verify(&self, peer: &PeerIdentity) -> Result<bool, IdentityError> {
        let pid = peer.pid.ok_or(IdentityError::MissingPid)?;
        let exe = peer_executable(pid)?;
        let digest = executable_digest(&exe)?;
        let trusted = self.trusted.contains(&digest);
        debug!(pid, exe = %exe.display(), digest = %digest, trusted, "verified peer executable");
        Ok(trusted)
    }
}

/// blake3 digest (hex) of an executable file.
pub fn executable_digest(path: &Path) -> Result<String, IdentityError> {
    let wrap = |source| IdentityError::Executable {
        path: path.to_path_buf(),
        source,
    };

    let mut hasher = Hasher::new();
    let mut file = File::open(path).map_err(wrap)?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(wrap)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(target_os = "linux")]
fn peer_executable(pid: i32) -> Result<PathBuf, IdentityError> {
    Ok(PathBuf::from(format!("/proc/{pid}/exe")))
}

#[cfg(not(target_os = "linux"))]
fn peer_executable(_pid: i32) -> Result<PathBuf, IdentityError> {
    Err(IdentityError::Unsupported)
}
