//! Frame Protocol
//!
//! Every value and every handshake step travels as one frame: a
//! length-prefixed JSON payload with a CRC32 checksum.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+----------------+------------------------------------------+
//! | Length (4)     | Checksum (4)   | JSON Payload (variable)                  |
//! | big-endian u32 | CRC32 (BE)     | Message or HandshakeFrame                |
//! +----------------+----------------+------------------------------------------+
//! ```
//!
//! The length covers the payload only. The decoder checks the length against
//! its limit before buffering the payload, so an oversized prefix is rejected
//! without allocating for it.

use serde::{de::DeserializeOwned, Serialize};

use super::ChannelError;

/// Default maximum payload size (10 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Frame header size: 4 bytes length + 4 bytes checksum
pub const HEADER_SIZE: usize = 8;

const MIN_BUFFER_CAPACITY: usize = 4096;

#[inline]
fn checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Encode a value into a single frame
///
/// # Errors
///
/// Returns `ChannelError::Serialization` if JSON serialization fails and
/// `ChannelError::FrameTooLarge` if the payload exceeds `max_frame_size`.
pub fn encode<T: Serialize>(value: &T, max_frame_size: usize) -> Result<Vec<u8>, ChannelError> {
    let json = serde_json::to_vec(value).map_err(|e| ChannelError::Serialization(e.to_string()))?;

    if json.len() > max_frame_size {
        return Err(ChannelError::FrameTooLarge {
            size: json.len(),
            max: max_frame_size,
        });
    }
    let len = u32::try_from(json.len()).map_err(|_| ChannelError::FrameTooLarge {
        size: json.len(),
        max: u32::MAX as usize,
    })?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&checksum(&json).to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Streaming frame parser
///
/// Bytes are pushed as they arrive from the socket; complete frames are
/// pulled out with [`FrameDecoder::decode`].
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    /// Create a decoder that rejects payloads larger than `max_frame_size`
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            max_frame_size,
        }
    }

    /// Change the payload limit applied to frames not yet decoded
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        // Compact once the consumed prefix dominates the buffer
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed by a decoded frame
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Whether the decoder sits exactly on a frame boundary
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Try to decode the next frame
    ///
    /// Returns `Ok(None)` while the frame is incomplete. The read position
    /// only advances past a frame that decoded successfully.
    ///
    /// # Errors
    ///
    /// `FrameTooLarge` for an oversized length prefix, `ChecksumMismatch` for a
    /// corrupted payload, `Serialization` for a payload that is not valid JSON
    /// for `T`.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ChannelError> {
        let available = self.available();
        if available < HEADER_SIZE {
            return Ok(None);
        }

        let header = &self.buffer[self.read_pos..self.read_pos + HEADER_SIZE];
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        if len > self.max_frame_size {
            return Err(ChannelError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        if available < HEADER_SIZE + len {
            return Ok(None);
        }

        let start = self.read_pos + HEADER_SIZE;
        let end = start + len;
        let payload = &self.buffer[start..end];

        let actual = checksum(payload);
        if actual != expected {
            return Err(ChannelError::ChecksumMismatch { expected, actual });
        }

        let value =
            serde_json::from_slice(payload).map_err(|e| ChannelError::Serialization(e.to_string()))?;
        self.read_pos = end;

        Ok(Some(value))
    }
}
