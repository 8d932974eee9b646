// src/client/connection.rs

//! Caller side of one worker connection.
//!
//! Requests are written directly by the calling task; a background reader
//! routes replies to their waiting callers by id and hands log events to
//! the [`LogSink`]. Once the stream ends or a write fails the connection is
//! marked invalid and every call on it fails with a connection error; the
//! controller then replaces it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::authority::{AuthorizationToken, IssueFuture, TokenIssuer};
use crate::errors::{HelperError, Result};
use crate::protocol::{
    read_frame, write_frame, RemoteErrorKind, Reply, Request, RequestBody, WorkerMessage,
};
use crate::registry::CommandId;
use crate::types::HelperVersion;

use super::sink::LogSink;

type Pending = HashMap<u64, oneshot::Sender<Reply>>;

/// Reply routing table plus the liveness flag it is guarded with.
struct Routing {
    pending: Mutex<Pending>,
    valid: AtomicBool,
}

impl Routing {
    /// Mark the connection dead and fail every outstanding call.
    fn invalidate(&self) {
        let pending = self.pending.lock();
        self.valid.store(false, Ordering::SeqCst);
        if let Ok(mut pending) = pending {
            pending.clear();
        }
    }
}

/// Removes a call's routing entry when the caller stops waiting, whether
/// the reply arrived or the future was dropped.
struct PendingGuard<'a> {
    routing: &'a Routing,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.routing.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

pub struct HelperConnection {
    writer: AsyncMutex<OwnedWriteHalf>,
    routing: Arc<Routing>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl HelperConnection {
    /// Connect to the worker socket at `socket_path`.
    pub async fn connect(socket_path: &Path, sink: Arc<dyn LogSink>) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await.map_err(|e| {
            HelperError::Connection(format!("connecting to {}: {e}", socket_path.display()))
        })?;
        debug!(socket = %socket_path.display(), "connected to worker");

        let (read_half, write_half) = stream.into_split();
        let routing = Arc::new(Routing {
            pending: Mutex::new(HashMap::new()),
            valid: AtomicBool::new(true),
        });
        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&routing), sink));

        Ok(Self {
            writer: AsyncMutex::new(write_half),
            routing,
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.routing.valid.load(Ordering::SeqCst)
    }

    /// Calls still waiting for their reply.
    pub fn pending_calls(&self) -> usize {
        self.routing
            .pending
            .lock()
            .map(|pending| pending.len())
            .unwrap_or(0)
    }

    /// Ask the worker for an empty token bound to this connection's uid.
    pub async fn create_token(&self) -> Result<AuthorizationToken> {
        match self.call(RequestBody::CreateToken).await? {
            Reply::Token { token } => Ok(token),
            Reply::Error { error } => Err(HelperError::Remote(error)),
            other => Err(unexpected("create_token", &other)),
        }
    }

    pub async fn get_version(&self) -> Result<HelperVersion> {
        match self.call(RequestBody::GetVersion).await? {
            Reply::Version { version } => Ok(version),
            other => Err(unexpected("get_version", &other)),
        }
    }

    /// Run an allow-listed command. Returns the raw exit code, which may be
    /// the authorization-failed sentinel.
    pub async fn run_command(
        &self,
        command: CommandId,
        args: Vec<String>,
        token: Option<AuthorizationToken>,
    ) -> Result<i32> {
        let reply = self
            .call(RequestBody::RunCommand {
                command,
                args,
                token,
            })
            .await?;
        exit_code("run_command", reply)
    }

    /// Ask the worker to remove its installed files and exit.
    pub async fn run_uninstall(&self, token: AuthorizationToken) -> Result<i32> {
        let reply = self.call(RequestBody::RunUninstall { token }).await?;
        exit_code("run_uninstall", reply)
    }

    async fn call(&self, body: RequestBody) -> Result<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .routing
                .pending
                .lock()
                .map_err(|_| HelperError::Connection("reply table poisoned".to_string()))?;
            if !self.routing.valid.load(Ordering::SeqCst) {
                return Err(HelperError::Connection("connection invalidated".to_string()));
            }
            pending.insert(id, tx);
        }
        let _guard = PendingGuard {
            routing: &self.routing,
            id,
        };

        trace!(id, kind = body.kind(), "sending request");
        let request = Request { id, body };
        let written = {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &request).await
        };
        if let Err(e) = written {
            warn!(id, error = %e, "write to worker failed");
            self.routing.invalidate();
            return Err(e.into());
        }

        rx.await
            .map_err(|_| HelperError::Connection("worker closed the connection".to_string()))
    }
}

impl TokenIssuer for HelperConnection {
    fn issue_token(&self) -> IssueFuture<'_> {
        Box::pin(self.create_token())
    }
}

impl Drop for HelperConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn exit_code(call: &str, reply: Reply) -> Result<i32> {
    match reply {
        Reply::Exit { code } => Ok(code),
        Reply::Error { error } if error.kind == RemoteErrorKind::Spawn => {
            Err(HelperError::Spawn(error.message))
        }
        Reply::Error { error } => Err(HelperError::Remote(error)),
        other => Err(unexpected(call, &other)),
    }
}

fn unexpected(call: &str, reply: &Reply) -> HelperError {
    HelperError::Protocol(format!("unexpected reply to {call}: {reply:?}"))
}

async fn read_loop(read_half: OwnedReadHalf, routing: Arc<Routing>, sink: Arc<dyn LogSink>) {
    let mut reader = BufReader::new(read_half);
    loop {
        match read_frame::<_, WorkerMessage>(&mut reader).await {
            Ok(Some(WorkerMessage::Log { stream, text })) => sink.log(stream, &text),
            Ok(Some(WorkerMessage::Reply { id, reply })) => {
                let waiter = routing
                    .pending
                    .lock()
                    .ok()
                    .and_then(|mut pending| pending.remove(&id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => warn!(id, "reply for unknown request"),
                }
            }
            Ok(None) => {
                debug!("worker closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "reading from worker failed");
                break;
            }
        }
    }
    routing.invalidate();
}
