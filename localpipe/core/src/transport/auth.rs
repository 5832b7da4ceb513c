//! Shared-Key Authentication
//!
//! Both ends of a channel hold the same pre-shared [`AuthKey`]. It works as
//! an identifier for the pipe rather than a rotating credential, and it never
//! crosses the wire: each side proves possession by answering a random
//! challenge.
//!
//! # Handshake
//!
//! ```text
//!   listener                                   client
//!      │ ── Challenge { nonce_L } ───────────────► │
//!      │ ◄─────────────── Response { H(k‖nonce_L) } │
//!      │ ── Welcome | Failure ───────────────────► │
//!      │ ◄──────────────────── Challenge { nonce_C } │
//!      │ ── Response { H(k‖nonce_C) } ───────────► │
//!      │ ◄──────────────────── Welcome | Failure ─ │
//! ```
//!
//! `H` is SHA-256. Digests are compared in constant time.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Size of a challenge nonce in bytes
pub const NONCE_SIZE: usize = 32;

/// Size of a generated authkey in bytes
pub const GENERATED_KEY_SIZE: usize = 8;

/// Environment variable consulted by [`AuthKey::from_env`]
pub const AUTHKEY_ENV: &str = "LOCALPIPE_AUTHKEY";

/// Errors building an authkey
#[derive(Debug, Error)]
pub enum AuthKeyError {
    /// An empty key would authenticate everyone
    #[error("authkey must not be empty")]
    Empty,

    /// Hex input did not decode
    #[error("invalid hex authkey: {0}")]
    InvalidHex(String),
}

/// Pre-shared secret for a pipe
#[derive(Clone)]
pub struct AuthKey {
    bytes: Vec<u8>,
}

impl AuthKey {
    /// Create a key from raw bytes
    ///
    /// # Errors
    ///
    /// Returns `AuthKeyError::Empty` for an empty slice.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, AuthKeyError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(AuthKeyError::Empty);
        }
        Ok(Self { bytes })
    }

    /// Generate a random key, for a listener whose clients learn it out of band
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; GENERATED_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Parse a hex-encoded key
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not hex or decodes to nothing.
    pub fn from_hex(encoded: &str) -> Result<Self, AuthKeyError> {
        let bytes =
            hex::decode(encoded.trim()).map_err(|e| AuthKeyError::InvalidHex(e.to_string()))?;
        Self::new(bytes)
    }

    /// Read the key from `LOCALPIPE_AUTHKEY` (taken as raw UTF-8 bytes)
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var(AUTHKEY_ENV)
            .ok()
            .and_then(|v| Self::new(v.into_bytes()).ok())
    }

    /// Raw key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hex rendering, for handing a generated key to a client
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Digest a peer must present to answer `nonce`
    #[must_use]
    pub fn respond(&self, nonce: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hasher.update(nonce);

        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        digest
    }

    /// Check a peer's answer to `nonce`
    #[must_use]
    pub fn verify(&self, nonce: &[u8], answer: &[u8]) -> bool {
        constant_time_compare(&self.respond(nonce), answer)
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthKey([REDACTED; {}])", self.bytes.len())
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_compare(&self.bytes, &other.bytes)
    }
}

impl Eq for AuthKey {}

/// One step of the handshake, sent as an ordinary frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum HandshakeFrame {
    /// Hex-encoded random nonce to be answered
    Challenge {
        /// Nonce, hex
        nonce: String,
    },
    /// Hex-encoded digest answering the last challenge
    Response {
        /// Digest, hex
        digest: String,
    },
    /// The answer matched
    Welcome,
    /// The answer did not match
    Failure,
}

impl HandshakeFrame {
    /// A fresh challenge and the raw nonce it carries
    #[must_use]
    pub fn challenge() -> (Self, [u8; NONCE_SIZE]) {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        (
            Self::Challenge {
                nonce: hex::encode(nonce),
            },
            nonce,
        )
    }

    /// Name of the step, for error messages
    #[must_use]
    pub fn step(&self) -> &'static str {
        match self {
            Self::Challenge { .. } => "challenge",
            Self::Response { .. } => "response",
            Self::Welcome => "welcome",
            Self::Failure => "failure",
        }
    }
}

/// Constant-time byte comparison; length mismatches fail immediately
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
