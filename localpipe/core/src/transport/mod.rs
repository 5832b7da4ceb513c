//! Transport Layer
//!
//! Everything between a [`Message`](crate::Message) and the loopback socket:
//!
//! - [`frame`]: length-prefixed, checksummed JSON frames
//! - [`auth`]: the pre-shared key and the challenge/response handshake
//! - [`channel`]: an authenticated TCP connection exchanging whole values
//!
//! # Security
//!
//! - Listeners bind to `127.0.0.1` only; there is no network exposure
//! - The authkey never crosses the wire, only digests of random nonces
//! - No transport encryption: loopback traffic is visible to local root

pub mod auth;
pub mod channel;
pub mod error;
pub mod frame;

pub use auth::{AuthKey, AuthKeyError, HandshakeFrame};
pub use channel::{AuthenticatedChannel, ChannelOptions};
pub use error::ChannelError;
pub use frame::{FrameDecoder, DEFAULT_MAX_FRAME_SIZE};
