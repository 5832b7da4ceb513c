//! localpipe Core - Authenticated Loopback Messaging
//!
//! Moves structured values from client processes to a host process over
//! `127.0.0.1`, after both ends prove they hold the same pre-shared key.
//!
//! # Architecture
//!
//! ```text
//!   Host process                                         Client process
//! ┌─────────────────────────────────┐               ┌───────────────────────────┐
//! │  QueueReceiver ◄── QueueSender  │               │  QueueSender (host code)  │
//! │        ▲                        │               │        │                  │
//! │        │                        │   loopback    │        ▼                  │
//! │  ListenerService ◄──────────────┼───── TCP ─────┼── ClientService           │
//! │   ├─ accept + handshake         │  framed JSON  │   └─ AuthenticatedChannel │
//! │   ├─ ConnectionRegistry         │               │                           │
//! │   └─ CancellationFlag           │               │                           │
//! └─────────────────────────────────┘               └───────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Message`]: the closed set of values that can be sent; `Message::STOP`
//!   ends a client and closes its connection
//! - [`ListenerService`]: accepts clients and feeds their values into one queue
//! - [`ClientService`]: forwards one queue to a listener
//! - [`CancellationFlag`]: asks a listener to stop within one cycle time
//! - [`AuthKey`]: the shared secret checked during the handshake
//!
//! # Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use localpipe_core::{
//!     message_queue, AuthKey, CancellationFlag, ClientService, ListenerService, Message,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let key = AuthKey::generate();
//!     let cancel = CancellationFlag::new();
//!
//!     let (inbox_tx, mut inbox) = message_queue();
//!     let listener = ListenerService::new(0, inbox_tx, cancel.clone(), key.clone(), Duration::from_millis(500))
//!         .start()
//!         .await?;
//!
//!     let (outbox, outbox_rx) = message_queue();
//!     let client = ClientService::new(listener.local_addr().port(), key, outbox_rx, Duration::from_millis(500))
//!         .start()
//!         .await?;
//!
//!     outbox.put("varA")?;
//!     outbox.put_stop()?;
//!     client.join().await?;
//!
//!     assert_eq!(inbox.get().await?, Message::from("varA"));
//!     cancel.set();
//!     listener.join().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`message`]: the value type and its wire encoding
//! - [`queue`]: the in-process queues bridging host code and services
//! - [`cancel`]: the shared stop flag
//! - [`transport`]: framing, authentication, and the authenticated channel
//! - [`registry`]: the listener's live connections
//! - [`listener`]: the listener service and its control loop
//! - [`client`]: the client service
//! - [`config`]: TOML and environment configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod client;
pub mod config;
pub mod listener;
pub mod message;
pub mod queue;
pub mod registry;
pub mod transport;

pub use cancel::CancellationFlag;
pub use client::{ClientError, ClientHandle, ClientService, ClientSummary};
pub use listener::{ListenerError, ListenerHandle, ListenerService, ListenerSummary};
pub use message::Message;
pub use queue::{message_queue, QueueError, QueueReceiver, QueueSender};
pub use registry::{ConnectionId, ConnectionInfo, ConnectionRegistry, RegistryView};
pub use transport::{AuthKey, AuthKeyError, AuthenticatedChannel, ChannelError, ChannelOptions};

// Config exports
pub use config::{
    default_config_path, load_config_from_path, parse_config, ConfigError, PipeConfig,
    DEFAULT_CYCLE_TIME_MS, DEFAULT_PORT,
};
