// src/worker/listener.rs

//! The worker's accept loop.
//!
//! A single control loop owns the socket. It admits connections whose peer
//! passes code-identity verification, hands each one to a
//! [`WorkerSession`], and wakes on a fixed interval to check the shutdown
//! flag. The flag is raised when the last active connection closes, after a
//! successful uninstall, or on SIGINT/SIGTERM.

use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::errors::{HelperError, Result};
use crate::identity::{IdentityVerifier, PeerIdentity};

use super::{ListenerHandle, WorkerContext, WorkerSession};

/// Socket mode: any local user may connect; identity is checked per peer.
const SOCKET_MODE: u32 = 0o666;

pub struct WorkerListener {
    listener: UnixListener,
    socket_path: PathBuf,
    poll_interval: Duration,
    ctx: WorkerContext,
    verifier: Arc<dyn IdentityVerifier>,
    handle: ListenerHandle,
    sessions: JoinSet<()>,
}

impl WorkerListener {
    /// Bind `socket_path`, replacing a stale socket left by a previous run.
    pub fn bind(
        socket_path: impl Into<PathBuf>,
        poll_interval: Duration,
        ctx: WorkerContext,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Result<Self> {
        let socket_path = socket_path.into();
        remove_stale_socket(&socket_path)?;

        if let Some(parent) = socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            HelperError::Connection(format!("binding {}: {e}", socket_path.display()))
        })?;
        fs::set_permissions(&socket_path, fs::Permissions::from_mode(SOCKET_MODE))?;

        info!(socket = %socket_path.display(), ?poll_interval, "worker listening");

        Ok(Self {
            listener,
            socket_path,
            poll_interval,
            ctx,
            verifier,
            handle: ListenerHandle::new(),
            sessions: JoinSet::new(),
        })
    }

    /// Handle for observing the active set and requesting shutdown.
    pub fn handle(&self) -> ListenerHandle {
        self.handle.clone()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept and serve connections until the shutdown flag is observed.
    ///
    /// Sessions still running at that point are dropped, which kills any
    /// child they were waiting on. The socket file is removed on the way out.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => self.admit(stream).await,
                    Err(e) => warn!(error = %e, "accept failed"),
                },

                Some(joined) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "session task panicked");
                        }
                    }
                }

                _ = ticker.tick() => {
                    if self.handle.should_quit() {
                        info!("shutdown flag set; leaving accept loop");
                        break;
                    }
                }
            }
        }

        self.sessions.shutdown().await;
        if let Err(e) = fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(socket = %self.socket_path.display(), error = %e, "failed to remove socket");
            }
        }
        info!("worker stopped");
        Ok(())
    }

    /// Verify a new peer and start its session. Rejected peers are dropped,
    /// which closes the stream.
    async fn admit(&mut self, stream: UnixStream) {
        let peer = match PeerIdentity::from_stream(&stream) {
            Ok(peer) => peer,
            Err(e) => {
                warn!(error = %e, "rejecting connection: no peer credentials");
                return;
            }
        };

        let verifier = Arc::clone(&self.verifier);
        let verdict = tokio::task::spawn_blocking(move || verifier.verify(&peer)).await;
        match verdict {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                warn!(pid = ?peer.pid, uid = peer.uid, "rejecting connection: untrusted executable");
                return;
            }
            Ok(Err(e)) => {
                warn!(pid = ?peer.pid, uid = peer.uid, error = %e, "rejecting connection: identity check failed");
                return;
            }
            Err(e) => {
                error!(error = %e, "identity check task failed");
                return;
            }
        }

        let id = self.handle.register(peer);
        debug!(conn = id, pid = ?peer.pid, uid = peer.uid, "connection accepted");
        let session = WorkerSession::new(id, peer, self.ctx.clone(), self.handle.clone());
        self.sessions.spawn(session.serve(stream));
    }
}

fn remove_stale_socket(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!(socket = %path.display(), "removing stale socket");
            fs::remove_file(path)?;
            Ok(())
        }
        Ok(_) => Err(HelperError::Config(format!(
            "{} exists and is not a socket",
            path.display()
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
