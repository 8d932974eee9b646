// src/exec/mod.rs

//! Process execution layer.
//!
//! This module runs exactly the executable an allow-listed command names,
//! using `tokio::process::Command`, and streams its output while it runs.
//!
//! - [`backend`] provides the `ExecutorBackend` trait and the concrete
//!   `RealExecutorBackend` the worker uses in production; tests swap in a
//!   recording fake.
//! - [`task_runner`] spawns one child, pumps both output streams and
//!   resolves with the exit code (or kills the child on cancellation).
//! - [`output`] holds the output event type and the incremental reader.

pub mod backend;
pub mod output;
pub mod task_runner;

use thiserror::Error;

use crate::registry::{ArgumentError, CommandDescriptor, CommandId};

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use output::OutputEvent;
pub use task_runner::run_process;

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: CommandId,
    pub executable: String,
    pub args: Vec<String>,
}

impl ExecRequest {
    /// Resolve a descriptor and caller arguments into an invocation. The
    /// executable always comes from the descriptor.
    pub fn from_descriptor(
        descriptor: &CommandDescriptor,
        caller_args: &[String],
    ) -> Result<Self, ArgumentError> {
        let executable = descriptor.executable()?;
        let args = descriptor.expand_args(caller_args)?;
        Ok(Self {
            command: descriptor.id,
            executable: executable.to_string(),
            args,
        })
    }
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to spawn {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("waiting for {executable}: {source}")]
    Wait {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process cancelled because its connection went away")]
    Cancelled,
}
