// src/worker/mod.rs

//! Privileged side: the listener that admits connections and the sessions
//! that serve them.
//!
//! - [`listener`] owns the socket, verifies each peer, tracks the active
//!   connection set and decides when the worker quits.
//! - [`session`] serves one verified connection: version queries, token
//!   minting, authorized command runs with live output, and uninstall.
//! - [`uninstall`] removes the installed executable and its descriptor.

pub mod listener;
pub mod session;
pub mod uninstall;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info};

use crate::authority::AuthorityAdapter;
use crate::config::InstallSection;
use crate::exec::ExecutorBackend;
use crate::identity::PeerIdentity;
use crate::types::HelperVersion;

pub use listener::WorkerListener;
pub use session::WorkerSession;
pub use uninstall::{remove_installed, UninstallReport};

pub type ConnectionId = u64;

/// What the listener remembers about an admitted connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub peer: PeerIdentity,
    pub accepted_at: Instant,
}

/// Everything a session needs to serve requests.
#[derive(Clone)]
pub struct WorkerContext {
    pub authority: AuthorityAdapter,
    pub backend: Arc<dyn ExecutorBackend>,
    pub install: InstallSection,
    pub version: HelperVersion,
}

#[derive(Default)]
struct ListenerState {
    active: Mutex<HashMap<ConnectionId, ConnectionRecord>>,
    should_quit: AtomicBool,
    next_id: AtomicU64,
}

/// Shared view of the listener's connection set and shutdown flag.
///
/// Only the listener adds connections and only sessions remove their own;
/// the flag is recomputed after every removal.
#[derive(Clone, Default)]
pub struct ListenerHandle {
    state: Arc<ListenerState>,
}

impl ListenerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the main loop to stop at its next poll.
    pub fn request_shutdown(&self) {
        info!("shutdown requested");
        self.state.should_quit.store(true, Ordering::SeqCst);
    }

    pub fn should_quit(&self) -> bool {
        self.state.should_quit.load(Ordering::SeqCst)
    }

    pub fn active_connections(&self) -> usize {
        self.state.active.lock().map(|set| set.len()).unwrap_or(0)
    }

    pub(crate) fn register(&self, peer: PeerIdentity) -> ConnectionId {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut set) = self.state.active.lock() {
            set.insert(
                id,
                ConnectionRecord {
                    peer,
                    accepted_at: Instant::now(),
                },
            );
            debug!(conn = id, active = set.len(), "connection added to active set");
        }
        id
    }

    /// Peers of the connections currently in the active set.
    pub fn active_peers(&self) -> Vec<PeerIdentity> {
        self.state
            .active
            .lock()
            .map(|set| set.values().map(|record| record.peer).collect())
            .unwrap_or_default()
    }

    pub(crate) fn remove(&self, id: ConnectionId) {
        let (record, remaining) = match self.state.active.lock() {
            Ok(mut set) => (set.remove(&id), set.len()),
            Err(_) => (None, 0),
        };
        match record {
            Some(record) => debug!(
                conn = id,
                uid = record.peer.uid,
                pid = ?record.peer.pid,
                open_for = ?record.accepted_at.elapsed(),
                active = remaining,
                "connection removed from active set"
            ),
            None => debug!(conn = id, active = remaining, "connection was not in active set"),
        }

        if remaining == 0 {
            info!("last connection closed; worker will exit");
            self.state.should_quit.store(true, Ordering::SeqCst);
        }
    }
}
