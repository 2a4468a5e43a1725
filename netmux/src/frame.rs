//! Length-prefixed wire framing.
//!
//! A frame is an 8-byte big-endian header followed by the payload:
//!
//! ```text
//! [ N: u64 big-endian ][ N - 8 payload bytes ]
//! ```
//!
//! `N` counts the header itself, so the smallest valid frame is `8`
//! (an empty payload). There are no other header fields.
//!
//! Encoding happens up front when a send is created. Decoding is
//! incremental and lives in the inbound accumulator; this module only
//! validates the header once all 8 bytes have arrived.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Default upper bound on a declared frame size (header included).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// A header that cannot describe a valid frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The declared size does not even cover the header.
    #[error("declared frame size {0} is smaller than the 8-byte header")]
    TooShort(u64),

    /// The declared size exceeds the configured maximum.
    #[error("declared frame size {size} exceeds the maximum of {max}")]
    TooLarge { size: u64, max: usize },
}

/// Frames `payload`: the header carries `payload.len() + 8`.
///
/// # Examples
///
/// ```
/// let frame = netmux::frame::encode(b"hi");
/// assert_eq!(&frame[..8], &10u64.to_be_bytes());
/// assert_eq!(&frame[8..], b"hi");
/// ```
pub fn encode(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u64((HEADER_SIZE + payload.len()) as u64);
    frame.put_slice(payload);
    frame.freeze()
}

/// Validates a complete header and returns the payload length it announces.
///
/// # Errors
///
/// [`FrameError::TooShort`] if the declared size is below [`HEADER_SIZE`],
/// [`FrameError::TooLarge`] if it is above `max_frame_size`.
pub fn decode_size(header: [u8; HEADER_SIZE], max_frame_size: usize) -> Result<usize, FrameError> {
    let size = u64::from_be_bytes(header);

    if size < HEADER_SIZE as u64 {
        return Err(FrameError::TooShort(size));
    }

    if size > max_frame_size as u64 {
        return Err(FrameError::TooLarge {
            size,
            max: max_frame_size,
        });
    }

    Ok(size as usize - HEADER_SIZE)
}
