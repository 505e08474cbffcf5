//! Wire framing.
//!
//! Every message on the wire is one frame:
//!
//! ```text
//! [kind: u32 big-endian] [length: u64 big-endian] [payload: length bytes]
//! ```
//!
//! The same primitive carries both raw peer messages and RPC traffic; the
//! `kind` tag tells them apart. The receiver must read precisely `length`
//! payload bytes. A clean EOF before any header byte means the peer shut
//! down in an orderly way and is reported as "no frame"; a partial header
//! or a truncated payload means the stream is corrupt and is a framing
//! error.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{MeshError, Result};

/// Generic application payload.
pub const KIND_RAW: u32 = 0;
/// JSON-encoded [`RpcRequest`](crate::RpcRequest).
pub const KIND_RPC_REQUEST: u32 = 1;
/// JSON-encoded [`RpcResponse`](crate::RpcResponse).
pub const KIND_RPC_RESPONSE: u32 = 2;

/// Maximum frame payload size (64 MiB).
pub const MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

const KIND_LEN: usize = 4;
const LENGTH_LEN: usize = 8;

/// Encodes a frame into a single contiguous buffer.
///
/// The header and payload are assembled together so a writer can put the
/// whole frame on the wire with one `write_all` and never interleave with
/// another frame.
pub fn encode_frame(kind: u32, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(KIND_LEN + LENGTH_LEN + payload.len());
    buf.put_u32(kind);
    buf.put_u64(payload.len() as u64);
    buf.put_slice(payload);
    buf
}

/// Decodes one complete frame from a buffer.
///
/// # Errors
///
/// Returns [`MeshError::Framing`] if the buffer is shorter than a header,
/// shorter than the declared payload length, or declares an over-limit
/// length.
pub fn decode_frame(buf: &[u8]) -> Result<(u32, Vec<u8>)> {
    if buf.len() < KIND_LEN + LENGTH_LEN {
        return Err(MeshError::Framing(format!(
            "frame header truncated: {} bytes",
            buf.len()
        )));
    }
    let kind = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let len = u64::from_be_bytes([
        buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
    ]);
    check_length(len)?;
    let body = &buf[KIND_LEN + LENGTH_LEN..];
    if (body.len() as u64) < len {
        return Err(MeshError::Framing(format!(
            "frame payload truncated: expected {len} bytes, have {}",
            body.len()
        )));
    }
    Ok((kind, body[..len as usize].to_vec()))
}

/// Writes one frame and flushes.
pub async fn write_frame<W>(sink: &mut W, kind: u32, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(kind, payload);
    sink.write_all(&frame).await?;
    sink.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the stream ends cleanly before any header byte
/// (orderly peer shutdown). Any other short read is a framing error:
/// a partial header and a truncated payload both mean the stream was cut
/// mid-frame.
///
/// # Errors
///
/// Returns [`MeshError::Framing`] on a truncated or over-limit frame, or
/// [`MeshError::Io`] on other I/O failures.
pub async fn read_frame<R>(source: &mut R) -> Result<Option<(u32, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut kind_buf = [0u8; KIND_LEN];
    let mut filled = 0;
    while filled < KIND_LEN {
        let n = source.read(&mut kind_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(MeshError::Framing(format!(
                "stream ended after {filled} header bytes"
            )));
        }
        filled += n;
    }
    let kind = u32::from_be_bytes(kind_buf);

    let mut len_buf = [0u8; LENGTH_LEN];
    source
        .read_exact(&mut len_buf)
        .await
        .map_err(map_eof_to_framing)?;
    let len = u64::from_be_bytes(len_buf);
    check_length(len)?;

    let mut payload = vec![0u8; len as usize];
    source
        .read_exact(&mut payload)
        .await
        .map_err(map_eof_to_framing)?;
    Ok(Some((kind, payload)))
}

fn check_length(len: u64) -> Result<()> {
    if len > MAX_FRAME_SIZE {
        return Err(MeshError::Framing(format!(
            "frame too large: {len} bytes (max {MAX_FRAME_SIZE})"
        )));
    }
    Ok(())
}

fn map_eof_to_framing(err: std::io::Error) -> MeshError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        MeshError::Framing("stream ended mid-frame".to_string())
    } else {
        MeshError::Io(err)
    }
}
