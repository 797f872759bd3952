//! Length-prefixed framing for the echo protocol.
//!
//! Every message on the wire is a 4-byte little-endian length `L`
//! followed by exactly `L` payload bytes:
//!
//! ```text
//! offset 0..3  : u32 LE payload length L (0 <= L <= max)
//! offset 4..4+L: payload
//! ```
//!
//! Framing is independent of I/O. Callers accumulate bytes and ask
//! [`try_extract`] whether a complete frame is available.

use bytes::BufMut;
use thiserror::Error;

/// Size of the length header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size.
pub const MAX_MESSAGE_SIZE: usize = 1096;

/// Upper bound for a configured maximum payload size (16 MiB).
///
/// Every connection preallocates one maximum-size message for reading
/// and reserves as much again for its reply.
pub const MESSAGE_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// Framing errors. All of them are fatal to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Declared payload length exceeds the configured maximum.
    #[error("declared length {len} exceeds maximum {max}")]
    TooLarge { len: usize, max: usize },
}

/// A complete frame borrowed from the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Payload bytes (header stripped).
    pub payload: &'a [u8],
    /// Number of leading bytes the frame occupies, header included.
    pub consumed: usize,
}

/// Try to extract one frame from the front of `input`.
///
/// Returns `Ok(None)` while the header or the body is still incomplete.
/// An oversized length is rejected as soon as the header is readable,
/// without waiting for the body.
pub fn try_extract(
    input: &[u8],
    max_message_size: usize,
) -> Result<Option<Frame<'_>>, FrameError> {
    let Some(header) = input.get(..HEADER_SIZE) else {
        return Ok(None);
    };

    let mut len_bytes = [0u8; HEADER_SIZE];
    len_bytes.copy_from_slice(header);
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > max_message_size {
        return Err(FrameError::TooLarge {
            len,
            max: max_message_size,
        });
    }

    let consumed = HEADER_SIZE + len;
    match input.get(HEADER_SIZE..consumed) {
        Some(payload) => Ok(Some(Frame { payload, consumed })),
        None => Ok(None),
    }
}

/// Append `payload` as a frame to `out`.
///
/// The producer is responsible for keeping `payload` within the maximum
/// message size; the echo path only ever re-encodes payloads that were
/// accepted by [`try_extract`].
pub fn encode(payload: &[u8], out: &mut impl BufMut) {
    debug_assert!(payload.len() <= u32::MAX as usize);
    out.put_u32_le(payload.len() as u32);
    out.put_slice(payload);
}
