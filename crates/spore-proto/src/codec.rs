//! Length-prefixed framing.
//!
//! Every frame on a Spore stream is a 4-byte big-endian unsigned length
//! followed by exactly that many payload bytes:
//!
//! ```text
//! [u32 BE length][payload ...]
//! ```
//!
//! These functions are synchronous and work on byte buffers. Async wrappers
//! that read/write QUIC streams live in `spore-transport`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default maximum payload size (1 MiB). A length prefix above the limit is
/// rejected before anything is allocated for it.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Check a payload length against `max_len` and the u32 prefix range.
pub fn check_frame_len(len: usize, max_len: usize) -> Result<u32, FrameError> {
    let max = max_len.min(u32::MAX as usize);
    if len > max {
        return Err(FrameError::TooLarge { len, max });
    }
    Ok(len as u32)
}

/// Encode one frame: `[u32 BE length][payload]`.
pub fn encode_frame(payload: &[u8], max_len: usize) -> Result<Vec<u8>, FrameError> {
    let len = check_frame_len(payload.len(), max_len)?;
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(buf)
}

/// Append one frame to `buf`.
pub fn encode_frame_into(
    payload: &[u8],
    buf: &mut BytesMut,
    max_len: usize,
) -> Result<(), FrameError> {
    let len = check_frame_len(payload.len(), max_len)?;
    buf.reserve(FRAME_HEADER_LEN + payload.len());
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(())
}

/// Read the length prefix at the front of `buf`, if all four bytes are there.
pub fn peek_frame_len(buf: &[u8]) -> Option<usize> {
    let header: [u8; FRAME_HEADER_LEN] = buf.get(..FRAME_HEADER_LEN)?.try_into().ok()?;
    Some(u32::from_be_bytes(header) as usize)
}

/// Try to split one complete frame off the front of `buf`.
///
/// Returns `Ok(Some(payload))` when a whole frame is buffered, `Ok(None)` if
/// more data is needed, or `Err` if the advertised length exceeds `max_len`.
/// Consumed bytes are removed from `buf`; on `Ok(None)` nothing is consumed.
pub fn decode_frame(buf: &mut BytesMut, max_len: usize) -> Result<Option<Bytes>, FrameError> {
    let Some(len) = peek_frame_len(buf) else {
        return Ok(None);
    };

    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    if buf.len() < FRAME_HEADER_LEN + len {
        buf.reserve(FRAME_HEADER_LEN + len - buf.len());
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_LEN);
    Ok(Some(buf.split_to(len).freeze()))
}
