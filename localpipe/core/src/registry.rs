//! Connection Registry
//!
//! The listener's collection of live, authenticated connections.
//!
//! # Architecture
//!
//! ```text
//!                     ConnectionRegistry (owned by the listener loop)
//!                    ┌───────────────────────────────────────────────┐
//!                    │ StreamMap<ConnectionId, ReceiveStream>         │
//!                    │   polled as one readiness source               │
//!                    │ Arc<RwLock<Vec<ConnectionInfo>>>  ──────────────┼──► RegistryView
//!                    │   insertion-ordered snapshot                   │    (host, read-only)
//!                    └───────────────────────────────────────────────┘
//! ```
//!
//! # Thread Safety
//!
//! Only the listener's control loop mutates the registry, through `&mut self`,
//! so accept-append and poll-remove can never interleave. Each mutation
//! updates the stream map and the shared snapshot together; the snapshot's
//! lock is held only for the copy.

use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::Stream;
use parking_lot::RwLock;
use tokio_stream::{StreamExt, StreamMap};

use crate::transport::{AuthenticatedChannel, ChannelError};
use crate::Message;

/// Unique identifier for an accepted connection
///
/// Assigned when the connection joins the registry; stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier
    #[must_use]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What the host can see about a live connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Registry-assigned identifier
    pub id: ConnectionId,
    /// Client address
    pub peer: SocketAddr,
    /// When the connection joined the registry
    pub connected_at: Instant,
}

type ReceiveStream = Pin<Box<dyn Stream<Item = Result<Message, ChannelError>> + Send>>;

/// Turn a channel into an endless stream of receive results
///
/// The channel lives inside the stream; dropping the stream closes the socket.
fn receive_stream(channel: AuthenticatedChannel) -> ReceiveStream {
    Box::pin(futures::stream::unfold(channel, |mut channel| async move {
        let result = channel.receive().await;
        Some((result, channel))
    }))
}

/// Live connections, owned by one listener loop
pub struct ConnectionRegistry {
    streams: StreamMap<ConnectionId, ReceiveStream>,
    live: Arc<RwLock<Vec<ConnectionInfo>>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("live", &*self.live.read())
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: StreamMap::new(),
            live: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Read-only handle for observers outside the listener loop
    #[must_use]
    pub fn view(&self) -> RegistryView {
        RegistryView {
            live: Arc::clone(&self.live),
        }
    }

    /// Append an authenticated channel; returns its new identifier
    pub fn insert(&mut self, channel: AuthenticatedChannel) -> ConnectionId {
        let id = ConnectionId::next();
        let info = ConnectionInfo {
            id,
            peer: channel.peer_addr(),
            connected_at: Instant::now(),
        };

        self.streams.insert(id, receive_stream(channel));
        self.live.write().push(info);
        id
    }

    /// Remove a connection and close its socket
    ///
    /// Returns what was known about it, or `None` if it was not registered.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionInfo> {
        // Dropping the stream drops the channel, which closes the socket
        drop(self.streams.remove(&id));

        let mut live = self.live.write();
        let pos = live.iter().position(|info| info.id == id)?;
        Some(live.remove(pos))
    }

    /// Remove and close every connection; returns how many were closed
    pub fn clear(&mut self) -> usize {
        let ids: Vec<ConnectionId> = self.streams.keys().copied().collect();
        for id in &ids {
            drop(self.streams.remove(id));
        }
        let mut live = self.live.write();
        let closed = live.len();
        live.clear();
        closed
    }

    /// Whether `id` is currently registered
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.streams.contains_key(&id)
    }

    /// Number of live connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether there are no live connections
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Wait for the next receive result on any connection
    ///
    /// Pending forever while the registry is empty, so it can sit in a
    /// `select!` next to the accept branch. Cancel-safe.
    pub async fn next_received(&mut self) -> (ConnectionId, Result<Message, ChannelError>) {
        if self.streams.is_empty() {
            return std::future::pending().await;
        }
        match self.streams.next().await {
            Some(item) => item,
            // Receive streams never end on their own, so a non-empty map
            // always yields an item
            None => std::future::pending().await,
        }
    }
}

/// Cloneable, read-only snapshot access to a registry
#[derive(Debug, Clone)]
pub struct RegistryView {
    live: Arc<RwLock<Vec<ConnectionInfo>>>,
}

impl RegistryView {
    /// Number of live connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.read().len()
    }

    /// Whether there are no live connections
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.read().is_empty()
    }

    /// Live connections in the order they were accepted
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.live.read().clone()
    }

    /// Whether a connection from `peer` is registered
    #[must_use]
    pub fn contains_peer(&self, peer: SocketAddr) -> bool {
        self.live.read().iter().any(|info| info.peer == peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AuthKey, ChannelOptions};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Connected (listener side, client side) channel pair over loopback
    async fn channel_pair() -> (AuthenticatedChannel, AuthenticatedChannel) {
        let key = AuthKey::new(b"registry".to_vec()).unwrap();
        let options = ChannelOptions::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_key = key.clone();
        let accept_options = options.clone();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            AuthenticatedChannel::accept(stream, peer, &accept_key, &accept_options)
                .await
                .unwrap()
        });
        let client = AuthenticatedChannel::connect(addr, &key, &options)
            .await
            .unwrap();
        (server.await.unwrap(), client)
    }

    #[test]
    fn test_connection_id_display_and_order() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert!(a < b);
        assert_eq!(a.to_string(), format!("conn-{}", a.as_u64()));
    }

    #[tokio::test]
    async fn test_insert_and_remove_update_view() {
        let mut registry = ConnectionRegistry::new();
        let view = registry.view();

        let (server_a, client_a) = channel_pair().await;
        let (server_b, _client_b) = channel_pair().await;
        let peer_a = server_a.peer_addr();

        let a = registry.insert(server_a);
        let b = registry.insert(server_b);
        assert_eq!(registry.len(), 2);
        assert_eq!(view.len(), 2);
        assert!(view.contains_peer(peer_a));

        let ids: Vec<ConnectionId> = view.connections().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a, b]);

        let removed = registry.remove(a).unwrap();
        assert_eq!(removed.id, a);
        assert!(!registry.contains(a));
        assert!(registry.contains(b));
        assert_eq!(view.len(), 1);
        assert!(registry.remove(a).is_none());

        drop(client_a);
    }

    #[tokio::test]
    async fn test_next_received_tags_connection() {
        let mut registry = ConnectionRegistry::new();
        let (server, mut client) = channel_pair().await;
        let id = registry.insert(server);

        client.send(&Message::from("varA")).await.unwrap();

        let (from, result) = tokio::time::timeout(Duration::from_secs(2), registry.next_received())
            .await
            .unwrap();
        assert_eq!(from, id);
        assert_eq!(result.unwrap(), Message::from("varA"));
    }

    #[tokio::test]
    async fn test_next_received_reports_end_of_stream() {
        let mut registry = ConnectionRegistry::new();
        let (server, client) = channel_pair().await;
        let id = registry.insert(server);

        client.close().await.unwrap();

        let (from, result) = tokio::time::timeout(Duration::from_secs(2), registry.next_received())
            .await
            .unwrap();
        assert_eq!(from, id);
        assert!(matches!(result, Err(ChannelError::EndOfStream)));
    }

    #[tokio::test]
    async fn test_empty_registry_is_pending() {
        let mut registry = ConnectionRegistry::new();
        let result =
            tokio::time::timeout(Duration::from_millis(20), registry.next_received()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_clear_closes_everything() {
        let mut registry = ConnectionRegistry::new();
        let view = registry.view();
        let (server, mut client) = channel_pair().await;
        registry.insert(server);

        assert_eq!(registry.clear(), 1);
        assert!(registry.is_empty());
        assert!(view.is_empty());

        let result = tokio::time::timeout(Duration::from_secs(2), client.receive())
            .await
            .unwrap();
        assert!(matches!(result, Err(ChannelError::EndOfStream)));
    }
}
