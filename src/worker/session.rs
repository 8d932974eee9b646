// src/worker/session.rs

//! One verified connection, served until the peer goes away.
//!
//! Three tasks cooperate:
//! - a reader decodes request frames and queues them in arrival order;
//! - the session loop handles one request at a time and produces exactly one
//!   reply per request;
//! - a writer owns the socket's write half and serializes everything going
//!   out, so log events and replies never interleave mid-frame.
//!
//! When the reader hits end of stream it flips the cancel flag, which kills
//! any process still running on behalf of this connection.

use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::authority::AuthorizationToken;
use crate::exec::{ExecError, ExecRequest, OutputEvent};
use crate::identity::PeerIdentity;
use crate::protocol::{
    read_frame, write_frame, RemoteError, RemoteErrorKind, Reply, Request, RequestBody,
    WorkerMessage,
};
use crate::registry::{self, CommandId};
use crate::types::{StreamKind, AUTHORIZATION_FAILED_EXIT_CODE, UNINSTALL_FAILED_EXIT_CODE};

use super::uninstall::remove_installed;
use super::{ConnectionId, ListenerHandle, WorkerContext};

const REQUEST_QUEUE: usize = 16;
const OUTBOUND_QUEUE: usize = 64;

/// What the session loop should do after a reply has been queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum After {
    Continue,
    /// The worker uninstalled itself: flush, close and stop the listener.
    Quit,
}

/// Aborts the wrapped task on drop, so a session torn down by the listener
/// takes its reader and writer with it.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct WorkerSession {
    id: ConnectionId,
    peer: PeerIdentity,
    ctx: WorkerContext,
    handle: ListenerHandle,
}

impl WorkerSession {
    pub fn new(
        id: ConnectionId,
        peer: PeerIdentity,
        ctx: WorkerContext,
        handle: ListenerHandle,
    ) -> Self {
        Self {
            id,
            peer,
            ctx,
            handle,
        }
    }

    /// Serve `stream` until the peer disconnects (or an uninstall completes),
    /// then remove this connection from the active set.
    pub async fn serve(self, stream: UnixStream) {
        let (read_half, write_half) = stream.into_split();

        let (out_tx, out_rx) = mpsc::channel::<WorkerMessage>(OUTBOUND_QUEUE);
        let (req_tx, mut req_rx) = mpsc::channel::<Request>(REQUEST_QUEUE);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut writer = AbortOnDrop(tokio::spawn(write_loop(self.id, write_half, out_rx)));
        let reader = AbortOnDrop(tokio::spawn(read_loop(
            self.id, read_half, req_tx, cancel_tx,
        )));

        info!(conn = self.id, uid = self.peer.uid, pid = ?self.peer.pid, "session started");

        let mut after = After::Continue;
        while let Some(request) = req_rx.recv().await {
            debug!(conn = self.id, id = request.id, kind = request.body.kind(), "handling request");

            let (reply, next) = self.handle(request.body, &out_tx, cancel_rx.clone()).await;
            if out_tx
                .send(WorkerMessage::Reply {
                    id: request.id,
                    reply,
                })
                .await
                .is_err()
            {
                debug!(conn = self.id, "writer gone; ending session");
                break;
            }
            if next == After::Quit {
                after = After::Quit;
                break;
            }
        }

        drop(reader);
        drop(out_tx);
        // Let the writer drain so the final reply reaches the peer.
        let _ = (&mut writer.0).await;

        info!(conn = self.id, "session ended");
        self.handle.remove(self.id);
        if after == After::Quit {
            self.handle.request_shutdown();
        }
    }

    async fn handle(
        &self,
        body: RequestBody,
        out: &mpsc::Sender<WorkerMessage>,
        cancel: watch::Receiver<bool>,
    ) -> (Reply, After) {
        match body {
            RequestBody::GetVersion => (
                Reply::Version {
                    version: self.ctx.version.clone(),
                },
                After::Continue,
            ),
            RequestBody::CreateToken => (self.create_token().await, After::Continue),
            RequestBody::RunCommand {
                command,
                args,
                token,
            } => (
                self.run_command(command, &args, token.as_ref(), out, cancel)
                    .await,
                After::Continue,
            ),
            RequestBody::RunUninstall { token } => self.run_uninstall(&token, out).await,
        }
    }

    async fn create_token(&self) -> Reply {
        match self.ctx.authority.issue_token(&self.peer.subject()).await {
            Ok(token) => {
                debug!(conn = self.id, uid = self.peer.uid, "issued authorization token");
                Reply::Token { token }
            }
            Err(err) => {
                warn!(conn = self.id, error = %err, "could not mint authorization token");
                Reply::Error {
                    error: RemoteError::new(RemoteErrorKind::Authorization, err.to_string()),
                }
            }
        }
    }

    /// Check authorization for `command`. `Err` carries the reply to send
    /// instead of running anything.
    async fn authorize(
        &self,
        command: CommandId,
        token: Option<&AuthorizationToken>,
        out: &mpsc::Sender<WorkerMessage>,
    ) -> Result<(), Reply> {
        match self
            .ctx
            .authority
            .verify(token, command, &self.peer.subject())
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(conn = self.id, %command, uid = self.peer.uid, "authorization denied");
                send_log(out, StreamKind::Stderr, format!("Authorization denied for {command}\n"))
                    .await;
                Err(Reply::Exit {
                    code: AUTHORIZATION_FAILED_EXIT_CODE,
                })
            }
            Err(err) => {
                warn!(conn = self.id, %command, error = %err, "authorization check failed");
                Err(Reply::Error {
                    error: RemoteError::new(RemoteErrorKind::Authorization, err.to_string()),
                })
            }
        }
    }

    async fn run_command(
        &self,
        command: CommandId,
        args: &[String],
        token: Option<&AuthorizationToken>,
        out: &mpsc::Sender<WorkerMessage>,
        cancel: watch::Receiver<bool>,
    ) -> Reply {
        let descriptor = registry::lookup(command);

        // Malformed requests never reach the credential authority.
        let request = match ExecRequest::from_descriptor(descriptor, args) {
            Ok(request) => request,
            Err(err) => {
                debug!(conn = self.id, %command, error = %err, "rejecting request arguments");
                return Reply::Error {
                    error: RemoteError::new(RemoteErrorKind::InvalidRequest, err.to_string()),
                };
            }
        };

        if let Err(reply) = self.authorize(command, token, out).await {
            return reply;
        }

        info!(
            conn = self.id,
            %command,
            executable = %request.executable,
            args = ?request.args,
            "running command"
        );

        let (sink_tx, mut sink_rx) = mpsc::channel::<OutputEvent>(OUTBOUND_QUEUE);
        let forward_out = out.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = sink_rx.recv().await {
                let message = WorkerMessage::Log {
                    stream: event.stream,
                    text: event.text,
                };
                if forward_out.send(message).await.is_err() {
                    break;
                }
            }
        });

        let result = self.ctx.backend.run(request, sink_tx, cancel).await;
        // Every log event precedes the reply.
        let _ = forwarder.await;

        match result {
            Ok(code) => {
                info!(conn = self.id, %command, exit_code = code, "command finished");
                Reply::Exit { code }
            }
            Err(ExecError::Spawn { executable, source }) => {
                warn!(conn = self.id, %command, %executable, error = %source, "spawn failed");
                Reply::Error {
                    error: RemoteError::new(
                        RemoteErrorKind::Spawn,
                        format!("failed to spawn {executable}: {source}"),
                    ),
                }
            }
            Err(err) => {
                warn!(conn = self.id, %command, error = %err, "command did not complete");
                Reply::Error {
                    error: RemoteError::new(RemoteErrorKind::Internal, err.to_string()),
                }
            }
        }
    }

    async fn run_uninstall(
        &self,
        token: &AuthorizationToken,
        out: &mpsc::Sender<WorkerMessage>,
    ) -> (Reply, After) {
        if let Err(reply) = self.authorize(CommandId::Uninstall, Some(token), out).await {
            return (reply, After::Continue);
        }

        info!(conn = self.id, "uninstalling worker");
        let install = self.ctx.install.clone();
        let report = match tokio::task::spawn_blocking(move || remove_installed(&install)).await {
            Ok(report) => report,
            Err(e) => {
                return (
                    Reply::Error {
                        error: RemoteError::new(
                            RemoteErrorKind::Internal,
                            format!("uninstall task failed: {e}"),
                        ),
                    },
                    After::Continue,
                );
            }
        };

        for removal in [&report.executable, &report.descriptor] {
            match &removal.error {
                None => {
                    send_log(
                        out,
                        StreamKind::Stdout,
                        format!("Removed {}\n", removal.path.display()),
                    )
                    .await
                }
                Some(error) => {
                    send_log(
                        out,
                        StreamKind::Stderr,
                        format!("Failed to remove {}: {error}\n", removal.path.display()),
                    )
                    .await
                }
            }
        }

        if report.is_complete() {
            (Reply::Exit { code: 0 }, After::Quit)
        } else {
            (
                Reply::Exit {
                    code: UNINSTALL_FAILED_EXIT_CODE,
                },
                After::Continue,
            )
        }
    }
}

async fn send_log(out: &mpsc::Sender<WorkerMessage>, stream: StreamKind, text: String) {
    let _ = out.send(WorkerMessage::Log { stream, text }).await;
}

async fn read_loop(
    conn: ConnectionId,
    read_half: OwnedReadHalf,
    requests: mpsc::Sender<Request>,
    cancel: watch::Sender<bool>,
) {
    let mut reader = BufReader::new(read_half);
    loop {
        match read_frame::<_, Request>(&mut reader).await {
            Ok(Some(request)) => {
                if requests.send(request).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(conn, "peer closed connection");
                break;
            }
            Err(err) => {
                warn!(conn, error = %err, "dropping connection after bad frame");
                break;
            }
        }
    }
    let _ = cancel.send(true);
}

async fn write_loop(
    conn: ConnectionId,
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<WorkerMessage>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(err) = write_frame(&mut write_half, &message).await {
            debug!(conn, error = %err, "write to peer failed");
            break;
        }
    }
}
