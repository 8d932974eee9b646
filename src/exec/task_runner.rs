// src/exec/task_runner.rs

//! Individual process runner.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::exec::output::pump_stream;
use crate::exec::{ExecError, ExecRequest, OutputEvent};
use crate::types::StreamKind;

/// `PATH` handed to children; everything else in the environment is cleared.
const CHILD_PATH: &str = "/usr/bin:/bin";

/// Run a single process, streaming stdout/stderr into `sink`.
///
/// - Both streams are drained before the exit code is returned, so every
///   output event precedes the result.
/// - If `cancel` fires, the child is killed and reaped and no exit code is
///   reported.
pub async fn run_process(
    request: &ExecRequest,
    sink: mpsc::Sender<OutputEvent>,
    mut cancel: watch::Receiver<bool>,
) -> Result<i32, ExecError> {
    info!(
        command = %request.command,
        executable = %request.executable,
        args = ?request.args,
        "starting process"
    );

    let mut cmd = Command::new(&request.executable);
    cmd.args(&request.args)
        .env_clear()
        .env("PATH", CHILD_PATH)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        executable: request.executable.clone(),
        source,
    })?;

    let mut pumps: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump_stream(stdout, StreamKind::Stdout, sink.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump_stream(stderr, StreamKind::Stderr, sink)));
    }

    // Either the process exits on its own (normal case), or the owning
    // connection disappears and we must not leave the child behind.
    tokio::select! {
        status_res = child.wait() => {
            let status = status_res.map_err(|source| ExecError::Wait {
                executable: request.executable.clone(),
                source,
            })?;

            for pump in pumps {
                if let Err(e) = pump.await {
                    debug!(error = %e, "output pump task ended abnormally");
                }
            }

            let code = exit_code(status);
            info!(
                command = %request.command,
                exit_code = code,
                success = status.success(),
                "process exited"
            );
            Ok(code)
        }

        _ = cancelled(&mut cancel) => {
            info!(command = %request.command, "cancellation requested; killing process");
            if let Err(e) = child.kill().await {
                warn!(command = %request.command, error = %e, "failed to kill child process");
            }
            for pump in pumps {
                pump.abort();
            }
            Err(ExecError::Cancelled)
        }
    }
}

/// Resolves once `cancel` is `true` or its sender has been dropped.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // An Err means the sender is gone, which counts as cancellation too.
    let _ = cancel.wait_for(|flag| *flag).await;
}

/// Exit code of a finished child; signal deaths map to `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}
