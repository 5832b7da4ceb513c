//! Channel Errors

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur on an authenticated channel
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Could not reach the listener
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer closed the connection cleanly between frames
    #[error("end of stream")]
    EndOfStream,

    /// The peer closed the connection in the middle of a frame
    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    Truncated {
        /// Bytes of the incomplete frame that were received
        buffered: usize,
    },

    /// The peer presented a different authkey
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The peer sent something other than the expected handshake frame
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A connect or handshake step did not finish in time
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// What was being waited on
        operation: &'static str,
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// Message serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Frame length prefix exceeds the configured limit
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared or encoded payload size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Frame checksum mismatch - data corruption detected
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the frame header
        expected: u32,
        /// Checksum computed over the received payload
        actual: u32,
    },

    /// IO error from the underlying socket
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Whether the peer simply went away, as opposed to misbehaving
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::EndOfStream | Self::Truncated { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
