// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The worker session talks to an `ExecutorBackend` instead of spawning
//! processes directly. This keeps the authorization path testable: a fake
//! backend can record whether anything would have been spawned.
//!
//! - `RealExecutorBackend` is the default implementation used by the worker.
//! - Tests provide their own `ExecutorBackend` that records requests and
//!   replays canned output.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, watch};

use super::task_runner::run_process;
use super::{ExecError, ExecRequest, OutputEvent};

pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<i32, ExecError>> + Send + 'a>>;

/// Trait abstracting how an authorized command is executed.
pub trait ExecutorBackend: Send + Sync {
    /// Run `request` to completion.
    ///
    /// - Output goes to `sink` while the process runs.
    /// - Resolves with the exit code once all output has been forwarded.
    /// - When `cancel` flips to `true` (or its sender is dropped) the process
    ///   must be terminated and reaped, resolving with
    ///   [`ExecError::Cancelled`].
    fn run(
        &self,
        request: ExecRequest,
        sink: mpsc::Sender<OutputEvent>,
        cancel: watch::Receiver<bool>,
    ) -> ExecFuture<'_>;
}

/// Real executor backend used in production.
#[derive(Debug, Default, Clone)]
pub struct RealExecutorBackend;

impl RealExecutorBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn run(
        &self,
        request: ExecRequest,
        sink: mpsc::Sender<OutputEvent>,
        cancel: watch::Receiver<bool>,
    ) -> ExecFuture<'_> {
        Box::pin(async move { run_process(&request, sink, cancel).await })
    }
}
