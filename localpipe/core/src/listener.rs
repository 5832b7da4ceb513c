//! Listener Service
//!
//! Accepts authenticated client connections on a loopback port and funnels
//! every value they send into one outbound queue for the host.
//!
//! # Control Loop
//!
//! A single task drives everything with one `select!` per iteration:
//!
//! ```text
//!            ┌──────────────── cancellation checked ◄───────────────┐
//!            ▼                                                      │
//!   ┌─────────────────┬──────────────────┬────────────────┬────────┴──┐
//!   │ accept()        │ handshake done   │ value received │ cycle tick │
//!   │ spawn handshake │ register channel │ queue / close  │ (idle)     │
//!   └─────────────────┴──────────────────┴────────────────┴───────────┘
//! ```
//!
//! The tick fires every `cycle_time`, so a set [`CancellationFlag`] is seen
//! within one cycle even when no client is active. Handshakes run in their own
//! tasks, bounded by the handshake timeout, so a stalled peer never blocks
//! accepting or polling.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::cancel::CancellationFlag;
use crate::config::{ConfigError, PipeConfig};
use crate::queue::QueueSender;
use crate::registry::{ConnectionId, ConnectionRegistry, RegistryView};
use crate::transport::{AuthKey, AuthenticatedChannel, ChannelError, ChannelOptions};
use crate::Message;

/// Errors that stop a listener
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The loopback port could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted
        addr: SocketAddr,
        /// The underlying IO error
        source: io::Error,
    },

    /// The listening socket failed in a way that will not recover
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The host dropped the receiving end of the outbound queue
    #[error("outbound queue closed by the host")]
    QueueClosed,

    /// The listener task panicked or was aborted
    #[error("listener task failed: {0}")]
    Task(#[from] JoinError),

    /// Settings the listener cannot run with
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Counters reported when a listener stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerSummary {
    /// Connections that completed the handshake and joined the registry
    pub accepted: u64,
    /// Sockets turned away (failed handshake or connection limit)
    pub rejected: u64,
    /// Values pushed onto the outbound queue
    pub delivered: u64,
    /// Connections removed by stop sentinel, end-of-stream, or receive error
    pub disconnected: u64,
    /// Connections still open when the listener stopped
    pub closed_at_shutdown: u64,
}

/// Authenticated loopback listener feeding a host queue
#[derive(Debug)]
pub struct ListenerService {
    port: u16,
    outbound: QueueSender,
    cancel: CancellationFlag,
    authkey: AuthKey,
    cycle_time: Duration,
    options: ChannelOptions,
    max_connections: usize,
}

impl ListenerService {
    /// Create a listener for `127.0.0.1:port`
    ///
    /// `port` 0 binds an ephemeral port; read it back from
    /// [`ListenerHandle::local_addr`].
    #[must_use]
    pub fn new(
        port: u16,
        outbound: QueueSender,
        cancel: CancellationFlag,
        authkey: AuthKey,
        cycle_time: Duration,
    ) -> Self {
        let defaults = PipeConfig::default();
        Self {
            port,
            outbound,
            cancel,
            authkey,
            cycle_time,
            options: ChannelOptions::from(&defaults),
            max_connections: defaults.max_connections,
        }
    }

    /// Create a listener from configuration
    ///
    /// # Errors
    ///
    /// Returns `ListenerError::Config` if the configuration fails validation.
    pub fn from_config(
        config: &PipeConfig,
        outbound: QueueSender,
        cancel: CancellationFlag,
        authkey: AuthKey,
    ) -> Result<Self, ListenerError> {
        config.validate()?;
        Ok(Self {
            port: config.port,
            outbound,
            cancel,
            authkey,
            cycle_time: config.cycle_time(),
            options: ChannelOptions::from(config),
            max_connections: config.max_connections,
        })
    }

    /// Override handshake timeout and frame limit
    #[must_use]
    pub fn with_channel_options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the live-connection limit
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Bind the port and spawn the control loop
    ///
    /// # Errors
    ///
    /// Returns `ListenerError::Bind` if the port cannot be bound; nothing is
    /// spawned in that case.
    pub async fn start(self) -> Result<ListenerHandle, ListenerError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        info!(addr = %local_addr, cycle_time = ?self.cycle_time, "Listening for connections");

        let registry = ConnectionRegistry::new();
        let view = registry.view();

        let control = ControlLoop {
            listener,
            registry,
            handshakes: JoinSet::new(),
            outbound: self.outbound,
            cancel: self.cancel,
            authkey: Arc::new(self.authkey),
            options: Arc::new(self.options),
            cycle_time: self.cycle_time,
            max_connections: self.max_connections,
            summary: ListenerSummary::default(),
        };
        let task = tokio::spawn(
            control
                .run()
                .instrument(tracing::info_span!("listener", addr = %local_addr)),
        );

        Ok(ListenerHandle {
            local_addr,
            registry: view,
            task,
        })
    }
}

/// Handle to a running listener
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    registry: RegistryView,
    task: JoinHandle<Result<ListenerSummary, ListenerError>>,
}

impl ListenerHandle {
    /// Address actually bound
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Read-only view of the live connections
    #[must_use]
    pub fn registry(&self) -> RegistryView {
        self.registry.clone()
    }

    /// Whether the control loop has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the control loop to exit
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the loop, or `Task` if it panicked.
    pub async fn join(self) -> Result<ListenerSummary, ListenerError> {
        self.task.await?
    }
}

type HandshakeResult = (SocketAddr, Result<AuthenticatedChannel, ChannelError>);

struct ControlLoop {
    listener: TcpListener,
    registry: ConnectionRegistry,
    handshakes: JoinSet<HandshakeResult>,
    outbound: QueueSender,
    cancel: CancellationFlag,
    authkey: Arc<AuthKey>,
    options: Arc<ChannelOptions>,
    cycle_time: Duration,
    max_connections: usize,
    summary: ListenerSummary,
}

impl ControlLoop {
    async fn run(mut self) -> Result<ListenerSummary, ListenerError> {
        let mut tick = tokio::time::interval(self.cycle_time);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            if self.cancel.is_set() {
                info!("Cancellation requested, stopping listener");
                break Ok(());
            }

            tokio::select! {
                accepted = self.listener.accept() => {
                    if let Err(e) = self.on_accept(accepted) {
                        break Err(e);
                    }
                }
                Some(joined) = self.handshakes.join_next(), if !self.handshakes.is_empty() => {
                    self.on_handshake(joined);
                }
                (id, received) = self.registry.next_received() => {
                    if let Err(e) = self.on_received(id, received) {
                        break Err(e);
                    }
                }
                _ = tick.tick() => {
                    trace!(
                        connections = self.registry.len(),
                        pending_handshakes = self.handshakes.len(),
                        "Cycle elapsed"
                    );
                }
            }
        };

        let summary = self.shutdown();
        outcome.map(|()| summary)
    }

    fn on_accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) -> Result<(), ListenerError> {
        match accepted {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "Socket accepted, authenticating");
                let authkey = Arc::clone(&self.authkey);
                let options = Arc::clone(&self.options);
                self.handshakes.spawn(async move {
                    let result = AuthenticatedChannel::accept(stream, peer, &authkey, &options).await;
                    (peer, result)
                });
                Ok(())
            }
            Err(e) if is_transient_accept_error(&e) => {
                warn!(error = %e, "Transient accept failure");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Accept failed");
                Err(ListenerError::Accept(e))
            }
        }
    }

    fn on_handshake(&mut self, joined: Result<HandshakeResult, JoinError>) {
        match joined {
            Ok((peer, Ok(channel))) => {
                if self.registry.len() >= self.max_connections {
                    warn!(
                        peer = %peer,
                        limit = self.max_connections,
                        "Connection limit reached, closing new connection"
                    );
                    self.summary.rejected += 1;
                    return;
                }

                let id = self.registry.insert(channel);
                self.summary.accepted += 1;
                info!(
                    conn_id = %id,
                    peer = %peer,
                    active_connections = self.registry.len(),
                    "Client connected"
                );
            }
            Ok((peer, Err(e))) => {
                self.summary.rejected += 1;
                warn!(peer = %peer, error = %e, "Rejected connection during handshake");
            }
            Err(e) => {
                self.summary.rejected += 1;
                warn!(error = %e, "Handshake task failed");
            }
        }
    }

    fn on_received(
        &mut self,
        id: ConnectionId,
        received: Result<Message, ChannelError>,
    ) -> Result<(), ListenerError> {
        match received {
            Ok(msg) if msg.is_stop() => self.disconnect(id, "stop sentinel"),
            Ok(msg) => {
                debug!(conn_id = %id, kind = msg.kind(), "Received message");
                self.outbound
                    .put(msg)
                    .map_err(|_| ListenerError::QueueClosed)?;
                self.summary.delivered += 1;
            }
            Err(ChannelError::EndOfStream) => self.disconnect(id, "end of stream"),
            Err(e) => {
                warn!(conn_id = %id, error = %e, "Receive failed, dropping connection");
                self.disconnect(id, "receive error");
            }
        }
        Ok(())
    }

    fn disconnect(&mut self, id: ConnectionId, reason: &'static str) {
        if let Some(info) = self.registry.remove(id) {
            self.summary.disconnected += 1;
            info!(
                conn_id = %id,
                peer = %info.peer,
                reason,
                uptime_ms = u64::try_from(info.connected_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                active_connections = self.registry.len(),
                "Client disconnected"
            );
        }
    }

    fn shutdown(self) -> ListenerSummary {
        let Self {
            listener,
            mut registry,
            mut handshakes,
            mut summary,
            ..
        } = self;

        drop(listener);
        handshakes.abort_all();
        let closed = registry.clear();
        summary.closed_at_shutdown = u64::try_from(closed).unwrap_or(u64::MAX);

        info!(
            closed_connections = closed,
            accepted = summary.accepted,
            delivered = summary.delivered,
            "Listener stopped"
        );
        summary
    }
}

/// Accept errors caused by a single misbehaving peer rather than the socket
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
