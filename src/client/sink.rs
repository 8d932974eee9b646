// src/client/sink.rs

use std::io::Write;

use crate::types::StreamKind;

/// Receives output the worker pushes while a command runs.
pub trait LogSink: Send + Sync {
    fn log(&self, stream: StreamKind, text: &str);
}

/// Writes worker output to this process's stdout/stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioSink;

impl LogSink for StdioSink {
    fn log(&self, stream: StreamKind, text: &str) {
        if text.is_empty() {
            return;
        }
        // Output is best effort; a closed terminal must not fail the command.
        let _ = match stream {
            StreamKind::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(text.as_bytes()).and_then(|_| out.flush())
            }
            StreamKind::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(text.as_bytes()).and_then(|_| err.flush())
            }
        };
    }
}
