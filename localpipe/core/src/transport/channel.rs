//! Authenticated Channel
//!
//! One TCP connection that has passed the shared-key handshake. After the
//! handshake it carries exactly one [`Message`] per `send`/`receive`.
//!
//! `receive` is cancel-safe: partial frames stay buffered in the channel,
//! so the listener can race it against other events in a `select!`.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::auth::{AuthKey, HandshakeFrame, NONCE_SIZE};
use super::frame::{encode, FrameDecoder, DEFAULT_MAX_FRAME_SIZE};
use super::ChannelError;
use crate::config::PipeConfig;
use crate::Message;

/// Handshake frames are tiny; anything bigger is a rogue peer
const HANDSHAKE_MAX_FRAME_SIZE: usize = 1024;

const READ_BUFFER_SIZE: usize = 8192;

/// Limits applied while establishing and using a channel
#[derive(Clone, Debug)]
pub struct ChannelOptions {
    /// Bound on the TCP connect (client side only)
    pub connect_timeout: Duration,
    /// Bound on the whole handshake exchange
    pub handshake_timeout: Duration,
    /// Largest payload accepted or produced
    pub max_frame_size: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl From<&PipeConfig> for ChannelOptions {
    fn from(config: &PipeConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            handshake_timeout: config.handshake_timeout(),
            max_frame_size: config.max_frame_size,
        }
    }
}

fn handshake_timed_out(timeout: Duration) -> ChannelError {
    ChannelError::Timeout {
        operation: "handshake",
        timeout,
    }
}

/// A connected, authenticated, framed message stream
#[derive(Debug)]
pub struct AuthenticatedChannel {
    stream: TcpStream,
    peer: SocketAddr,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    max_frame_size: usize,
}

impl AuthenticatedChannel {
    /// Connect to a listener and authenticate (client side)
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` if nothing is listening, `PermissionDenied` if the
    /// keys differ, `Timeout` if the connect or handshake stalls, `Handshake`
    /// if the peer does not speak the protocol.
    pub async fn connect(
        addr: SocketAddr,
        key: &AuthKey,
        options: &ChannelOptions,
    ) -> Result<Self, ChannelError> {
        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ChannelError::Timeout {
                operation: "connect",
                timeout: options.connect_timeout,
            })?
            .map_err(|e| ChannelError::ConnectionFailed(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;

        let mut channel = Self::wrap(stream, addr, options.max_frame_size);
        let handshake = async {
            channel.answer_challenge(key).await?;
            channel.deliver_challenge(key).await
        };
        tokio::time::timeout(options.handshake_timeout, handshake)
            .await
            .map_err(|_| handshake_timed_out(options.handshake_timeout))??;
        channel.finish_handshake();

        tracing::debug!(peer = %addr, "Channel authenticated");
        Ok(channel)
    }

    /// Authenticate a freshly accepted socket (listener side)
    ///
    /// # Errors
    ///
    /// Same conditions as [`AuthenticatedChannel::connect`], minus the
    /// connect step.
    pub async fn accept(
        stream: TcpStream,
        peer: SocketAddr,
        key: &AuthKey,
        options: &ChannelOptions,
    ) -> Result<Self, ChannelError> {
        stream.set_nodelay(true)?;

        let mut channel = Self::wrap(stream, peer, options.max_frame_size);
        let handshake = async {
            channel.deliver_challenge(key).await?;
            channel.answer_challenge(key).await
        };
        tokio::time::timeout(options.handshake_timeout, handshake)
            .await
            .map_err(|_| handshake_timed_out(options.handshake_timeout))??;
        channel.finish_handshake();

        tracing::debug!(peer = %peer, "Peer authenticated");
        Ok(channel)
    }

    fn wrap(stream: TcpStream, peer: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            stream,
            peer,
            decoder: FrameDecoder::new(HANDSHAKE_MAX_FRAME_SIZE),
            read_buf: vec![0u8; READ_BUFFER_SIZE],
            max_frame_size,
        }
    }

    /// Lift the handshake frame limit to the configured payload size
    fn finish_handshake(&mut self) {
        self.decoder.set_max_frame_size(self.max_frame_size);
    }

    /// Challenge the peer and check its answer
    async fn deliver_challenge(&mut self, key: &AuthKey) -> Result<(), ChannelError> {
        let (challenge, nonce) = HandshakeFrame::challenge();
        self.write_frame(&challenge).await?;

        let digest = match self.read_handshake_frame().await? {
            HandshakeFrame::Response { digest } => hex::decode(digest)
                .map_err(|e| ChannelError::Handshake(format!("response is not hex: {e}")))?,
            other => {
                return Err(ChannelError::Handshake(format!(
                    "expected response, got {}",
                    other.step()
                )))
            }
        };

        if key.verify(&nonce, &digest) {
            self.write_frame(&HandshakeFrame::Welcome).await
        } else {
            // Best effort: the peer learns why before the socket drops
            let _ = self.write_frame(&HandshakeFrame::Failure).await;
            Err(ChannelError::PermissionDenied(format!(
                "{} answered the challenge with a different authkey",
                self.peer
            )))
        }
    }

    /// Answer the peer's challenge and wait for its verdict
    async fn answer_challenge(&mut self, key: &AuthKey) -> Result<(), ChannelError> {
        let nonce = match self.read_handshake_frame().await? {
            HandshakeFrame::Challenge { nonce } => hex::decode(nonce)
                .map_err(|e| ChannelError::Handshake(format!("challenge is not hex: {e}")))?,
            other => {
                return Err(ChannelError::Handshake(format!(
                    "expected challenge, got {}",
                    other.step()
                )))
            }
        };
        if nonce.len() != NONCE_SIZE {
            return Err(ChannelError::Handshake(format!(
                "challenge nonce is {} bytes, expected {NONCE_SIZE}",
                nonce.len()
            )));
        }

        let response = HandshakeFrame::Response {
            digest: hex::encode(key.respond(&nonce)),
        };
        self.write_frame(&response).await?;

        match self.read_handshake_frame().await? {
            HandshakeFrame::Welcome => Ok(()),
            HandshakeFrame::Failure => Err(ChannelError::PermissionDenied(format!(
                "{} rejected our authkey",
                self.peer
            ))),
            other => Err(ChannelError::Handshake(format!(
                "expected verdict, got {}",
                other.step()
            ))),
        }
    }

    async fn read_handshake_frame(&mut self) -> Result<HandshakeFrame, ChannelError> {
        self.read_frame().await.map_err(|e| match e {
            ChannelError::Serialization(_)
            | ChannelError::FrameTooLarge { .. }
            | ChannelError::ChecksumMismatch { .. }
            | ChannelError::Truncated { .. } => ChannelError::Handshake(e.to_string()),
            other => other,
        })
    }

    async fn write_frame<T: Serialize>(&mut self, value: &T) -> Result<(), ChannelError> {
        let frame = encode(value, self.max_frame_size)?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<T, ChannelError> {
        loop {
            if let Some(value) = self.decoder.decode()? {
                return Ok(value);
            }

            let n = self.stream.read(&mut self.read_buf).await?;
            if n == 0 {
                return Err(if self.decoder.is_empty() {
                    ChannelError::EndOfStream
                } else {
                    ChannelError::Truncated {
                        buffered: self.decoder.available(),
                    }
                });
            }
            self.decoder.push(&self.read_buf[..n]);
        }
    }

    /// Send one value as a single frame
    ///
    /// # Errors
    ///
    /// `FrameTooLarge` or `Serialization` if the value cannot be framed, `Io`
    /// if the socket write fails.
    pub async fn send(&mut self, msg: &Message) -> Result<(), ChannelError> {
        self.write_frame(msg).await
    }

    /// Wait for the next complete value
    ///
    /// # Errors
    ///
    /// `EndOfStream` if the peer closed between frames, `Truncated` if it
    /// closed mid-frame, `ChecksumMismatch`/`FrameTooLarge`/`Serialization` on
    /// corrupted data, `Io` on socket failure.
    pub async fn receive(&mut self) -> Result<Message, ChannelError> {
        self.read_frame().await
    }

    /// Address of the other end
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Shut down the write side so the peer sees a clean end-of-stream
    ///
    /// # Errors
    ///
    /// Returns the socket error if the shutdown itself fails.
    pub async fn close(mut self) -> Result<(), ChannelError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
