// src/protocol/frame.rs

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame, newline excluded.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    TooLarge,

    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Read one newline-terminated JSON frame. `Ok(None)` on clean EOF.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    let limit = (MAX_FRAME_BYTES + 1) as u64;
    let n = (&mut *reader).take(limit).read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Ok(None);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
    } else if line.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge);
    }

    Ok(Some(serde_json::from_slice(&line)?))
}

/// Write one JSON frame followed by a newline, and flush.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
