//! Client Service
//!
//! Drains a host queue and forwards each value to a listener over one
//! authenticated connection. The stop sentinel is forwarded like any other
//! value and then ends the client.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, trace, Instrument};

use crate::config::{ConfigError, PipeConfig};
use crate::queue::{QueueError, QueueReceiver};
use crate::transport::{AuthKey, AuthenticatedChannel, ChannelError, ChannelOptions};
use crate::Message;

/// Errors that stop a client
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not connect to or authenticate with the listener
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Listener address
        addr: SocketAddr,
        /// What went wrong on the channel
        source: ChannelError,
    },

    /// The established channel failed while sending
    #[error("channel failed: {0}")]
    Channel(#[source] ChannelError),

    /// The client task panicked or was aborted
    #[error("client task failed: {0}")]
    Task(#[from] JoinError),

    /// Settings the client cannot run with
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Counters reported when a client stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSummary {
    /// Payload values sent, not counting the stop sentinel
    pub messages_sent: u64,
}

/// Queue-to-listener forwarder
#[derive(Debug)]
pub struct ClientService {
    port: u16,
    authkey: AuthKey,
    outbound: QueueReceiver,
    cycle_time: Duration,
    options: ChannelOptions,
}

impl ClientService {
    /// Create a client for the listener on `127.0.0.1:port`
    #[must_use]
    pub fn new(port: u16, authkey: AuthKey, outbound: QueueReceiver, cycle_time: Duration) -> Self {
        Self {
            port,
            authkey,
            outbound,
            cycle_time,
            options: ChannelOptions::default(),
        }
    }

    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the configuration fails validation.
    pub fn from_config(
        config: &PipeConfig,
        authkey: AuthKey,
        outbound: QueueReceiver,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            port: config.port,
            authkey,
            outbound,
            cycle_time: config.cycle_time(),
            options: ChannelOptions::from(config),
        })
    }

    /// Override connect/handshake timeouts and frame limit
    #[must_use]
    pub fn with_channel_options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    /// Connect, authenticate, and spawn the forwarding loop
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Connect` if the listener is unreachable or
    /// rejects the key; nothing is spawned in that case.
    pub async fn start(self) -> Result<ClientHandle, ClientError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let channel = AuthenticatedChannel::connect(addr, &self.authkey, &self.options)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;

        info!(addr = %addr, "Connected to listener");

        let task = tokio::spawn(
            forward(channel, self.outbound, self.cycle_time)
                .instrument(tracing::info_span!("client", addr = %addr)),
        );

        Ok(ClientHandle {
            peer_addr: addr,
            task,
        })
    }
}

/// Handle to a running client
#[derive(Debug)]
pub struct ClientHandle {
    peer_addr: SocketAddr,
    task: JoinHandle<Result<ClientSummary, ClientError>>,
}

impl ClientHandle {
    /// Listener address this client is connected to
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether the forwarding loop has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the forwarding loop to exit
    ///
    /// # Errors
    ///
    /// Returns the channel error that stopped the loop, or `Task` if it panicked.
    pub async fn join(self) -> Result<ClientSummary, ClientError> {
        self.task.await?
    }
}

async fn forward(
    mut channel: AuthenticatedChannel,
    mut outbound: QueueReceiver,
    cycle_time: Duration,
) -> Result<ClientSummary, ClientError> {
    let mut summary = ClientSummary::default();

    loop {
        let msg = match outbound.get_timeout(cycle_time).await {
            Ok(msg) => msg,
            Err(QueueError::Empty) => {
                trace!("Queue idle");
                continue;
            }
            Err(QueueError::Closed) => {
                info!("Queue closed by host, sending stop sentinel");
                Message::STOP
            }
        };

        channel.send(&msg).await.map_err(ClientError::Channel)?;

        if msg.is_stop() {
            info!(messages_sent = summary.messages_sent, "Stop sentinel sent");
            break;
        }
        summary.messages_sent += 1;
        debug!(kind = msg.kind(), "Forwarded message");
    }

    // The listener drops its side on the sentinel, so a failed shutdown is expected
    if let Err(e) = channel.close().await {
        debug!(error = %e, "Channel close after stop");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::message_queue;
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;

    fn key() -> AuthKey {
        AuthKey::new(b"client".to_vec()).unwrap()
    }

    /// Accept one authenticated channel on an ephemeral port
    async fn accept_one(listener: TcpListener) -> AuthenticatedChannel {
        let (stream, peer) = listener.accept().await.unwrap();
        AuthenticatedChannel::accept(stream, peer, &key(), &ChannelOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_forwards_until_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(accept_one(listener));

        let (tx, rx) = message_queue();
        let handle = ClientService::new(port, key(), rx, Duration::from_millis(20))
            .start()
            .await
            .unwrap();
        let mut server = server.await.unwrap();

        tx.put("varA").unwrap();
        tx.put(3).unwrap();
        tx.put_stop().unwrap();

        let mut received = Vec::new();
        for _ in 0..3 {
            let msg = tokio::time::timeout(Duration::from_secs(2), server.receive())
                .await
                .unwrap()
                .unwrap();
            received.push(msg);
        }
        assert_eq!(received, vec![Message::from("varA"), Message::Int(3), Message::STOP]);

        let summary = tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.messages_sent, 2);

        let after = tokio::time::timeout(Duration::from_secs(2), server.receive())
            .await
            .unwrap();
        assert!(matches!(after, Err(ChannelError::EndOfStream)));
    }

    #[tokio::test]
    async fn test_dropped_queue_sends_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(accept_one(listener));

        let (tx, rx) = message_queue();
        let handle = ClientService::new(port, key(), rx, Duration::from_millis(20))
            .start()
            .await
            .unwrap();
        let mut server = server.await.unwrap();

        tx.put(true).unwrap();
        drop(tx);

        let first = server.receive().await.unwrap();
        let second = server.receive().await.unwrap();
        assert_eq!(first, Message::Bool(true));
        assert!(second.is_stop());

        let summary = handle.join().await.unwrap();
        assert_eq!(summary.messages_sent, 1);
    }

    #[tokio::test]
    async fn test_no_listener_fails_start() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (_tx, rx) = message_queue();
        let result = ClientService::new(port, key(), rx, Duration::from_millis(20))
            .start()
            .await;
        assert!(matches!(result, Err(ClientError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_wrong_key_fails_start() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            AuthenticatedChannel::accept(stream, peer, &key(), &ChannelOptions::default()).await
        });

        let (_tx, rx) = message_queue();
        let wrong = AuthKey::new(b"not-the-key".to_vec()).unwrap();
        let result = ClientService::new(port, wrong, rx, Duration::from_millis(20))
            .start()
            .await;
        assert!(matches!(
            result,
            Err(ClientError::Connect {
                source: ChannelError::PermissionDenied(_),
                ..
            })
        ));
        assert!(matches!(
            server.await.unwrap(),
            Err(ChannelError::PermissionDenied(_))
        ));
    }
}
