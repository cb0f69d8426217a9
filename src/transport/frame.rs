//! # Request/Reply Framing
//!
//! Each message on the wire is a 4-byte big-endian length followed by the
//! message body.
//!
//! ```text
//! +----------------+----------------------+
//! | length (u32 BE)| body (length bytes)  |
//! +----------------+----------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, TelemetryError};

/// Size of the length prefix in bytes
pub const LEN_SIZE: usize = 4;

/// Largest body accepted in either direction (1 MiB)
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Encode a body as one length-prefixed frame
///
/// # Errors
///
/// Returns `Transport` if the body exceeds [`MAX_FRAME_LEN`]
pub fn encode_frame(body: &[u8]) -> Result<Bytes> {
    if body.len() > MAX_FRAME_LEN {
        return Err(TelemetryError::Transport(format!(
            "Frame of {} bytes exceeds maximum {}",
            body.len(),
            MAX_FRAME_LEN
        )));
    }

    let mut frame = BytesMut::with_capacity(LEN_SIZE + body.len());
    frame.put_u32(body.len() as u32);
    frame.put_slice(body);
    Ok(frame.freeze())
}

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(body)?;
    send_encoded(writer, &frame).await
}

/// Write a frame produced by [`encode_frame`] and flush
pub async fn send_encoded<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(frame)
        .await
        .map_err(|e| TelemetryError::Transport(format!("Failed to write frame: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| TelemetryError::Transport(format!("Failed to flush frame: {}", e)))?;
    Ok(())
}

/// Read exactly one frame
///
/// # Errors
///
/// Returns `Transport` if:
/// - The peer closes the connection before a full frame arrives
/// - The advertised length exceeds [`MAX_FRAME_LEN`]
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_SIZE];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| TelemetryError::Transport(format!("Failed to read frame length: {}", e)))?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TelemetryError::Transport(format!(
            "Reply of {} bytes exceeds maximum {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| TelemetryError::Transport(format!("Failed to read frame body: {}", e)))?;

    Ok(Bytes::from(body))
}
