use std::sync::{Arc, Mutex};

use privhelper::exec::backend::ExecFuture;
use privhelper::exec::{ExecError, ExecRequest, ExecutorBackend, OutputEvent};
use privhelper::types::StreamKind;
use tokio::sync::{mpsc, watch};

/// A fake executor that:
/// - records every request it was asked to run
/// - replays canned output, then reports a fixed exit code
/// - optionally fails to spawn.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    spawned: Arc<Mutex<Vec<ExecRequest>>>,
    output: Vec<OutputEvent>,
    exit_code: i32,
    fail_spawn: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, stream: StreamKind, text: &str) -> Self {
        self.output.push(OutputEvent {
            stream,
            text: text.to_string(),
        });
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn failing_spawn(mut self) -> Self {
        self.fail_spawn = true;
        self
    }

    pub fn spawned(&self) -> Vec<ExecRequest> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }
}

impl ExecutorBackend for RecordingBackend {
    fn run(
        &self,
        request: ExecRequest,
        sink: mpsc::Sender<OutputEvent>,
        _cancel: watch::Receiver<bool>,
    ) -> ExecFuture<'_> {
        Box::pin(async move {
            self.spawned.lock().unwrap().push(request.clone());
            if self.fail_spawn {
                return Err(ExecError::Spawn {
                    executable: request.executable,
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            for event in &self.output {
                let _ = sink.send(event.clone()).await;
            }
            Ok(self.exit_code)
        })
    }
}
