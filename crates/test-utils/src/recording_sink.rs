use std::sync::Mutex;

use privhelper::client::LogSink;
use privhelper::types::StreamKind;

/// Log sink that keeps everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(StreamKind, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(StreamKind, String)> {
        self.events.lock().unwrap().clone()
    }

    /// All text received on `stream`, concatenated.
    pub fn text(&self, stream: StreamKind) -> String {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, t)| t.as_str())
            .collect()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, stream: StreamKind, text: &str) {
        self.events.lock().unwrap().push((stream, text.to_string()));
    }
}
