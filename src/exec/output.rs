// src/exec/output.rs

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::types::StreamKind;

/// Read size for output pumps.
pub const CHUNK_SIZE: usize = 8192;

/// A chunk of child output, decoded as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
    pub stream: StreamKind,
    pub text: String,
}

/// Incremental UTF-8 decoder for output that arrives in arbitrary slices.
///
/// A character split across two reads is held back until its remaining
/// bytes arrive. Invalid sequences are skipped.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    /// Decode `bytes` after whatever was held back from the previous call.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        let mut consumed = 0;
        while consumed < self.pending.len() {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                }
                Err(e) => {
                    let valid_end = consumed + e.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&self.pending[consumed..valid_end]) {
                        text.push_str(valid);
                    }
                    match e.error_len() {
                        Some(len) => {
                            debug!(bytes = len, "dropping invalid UTF-8 sequence");
                            consumed = valid_end + len;
                        }
                        None => {
                            consumed = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        text
    }

    /// Bytes of an unfinished character still held back.
    pub fn held(&self) -> usize {
        self.pending.len()
    }
}

/// Forward everything `reader` produces to `sink` as soon as it arrives.
///
/// Output is decoded with [`Utf8Carry`], so nothing is lost when a read
/// ends inside a multi-byte character. If the sink goes away the pump keeps
/// reading (and discarding) so the child never blocks on a full pipe.
pub async fn pump_stream<R>(mut reader: R, stream: StreamKind, sink: mpsc::Sender<OutputEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; CHUNK_SIZE];
    let mut carry = Utf8Carry::default();
    let mut sink_open = true;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(%stream, error = %e, "output read failed; stopping pump");
                break;
            }
        };

        let text = carry.push(&buf[..n]);
        if text.is_empty() || !sink_open {
            continue;
        }

        trace!(%stream, bytes = n, "forwarding output chunk");
        if sink.send(OutputEvent { stream, text }).await.is_err() {
            debug!(%stream, "output sink closed; discarding further output");
            sink_open = false;
        }
    }

    if carry.held() > 0 {
        debug!(%stream, bytes = carry.held(), "output ended inside a UTF-8 character");
    }
}
