//! Message Queue Bridge
//!
//! Unbounded FIFO connecting the services to host code. The listener feeds
//! one queue that the host drains; the host feeds one queue per client.
//!
//! Every blocking read has a timeout variant so service loops can return to
//! their cancellation checks.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::Message;

/// Why a queue operation produced no value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Nothing arrived within the timeout (or nothing is queued right now)
    #[error("queue is empty")]
    Empty,

    /// The other end is gone and nothing is left to deliver
    #[error("queue is closed")]
    Closed,
}

/// Create a connected sender/receiver pair
#[must_use]
pub fn message_queue() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Producing end; clone it for additional producers
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl QueueSender {
    /// Enqueue a value without waiting
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Closed` if the receiver has been dropped.
    pub fn put(&self, msg: impl Into<Message>) -> Result<(), QueueError> {
        self.tx.send(msg.into()).map_err(|_| QueueError::Closed)
    }

    /// Enqueue the stop sentinel
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Closed` if the receiver has been dropped.
    pub fn put_stop(&self) -> Result<(), QueueError> {
        self.put(Message::STOP)
    }

    /// Whether the receiving end has been dropped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consuming end
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl QueueReceiver {
    /// Wait for the next value
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Closed` once every sender is gone and the queue
    /// is drained.
    pub async fn get(&mut self) -> Result<Message, QueueError> {
        self.rx.recv().await.ok_or(QueueError::Closed)
    }

    /// Wait at most `timeout` for the next value
    ///
    /// # Errors
    ///
    /// `QueueError::Empty` on timeout, `QueueError::Closed` as for [`get`](Self::get).
    pub async fn get_timeout(&mut self, timeout: Duration) -> Result<Message, QueueError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::Empty),
        }
    }

    /// Take the next value if one is already queued
    ///
    /// # Errors
    ///
    /// `QueueError::Empty` if nothing is queued, `QueueError::Closed` if
    /// nothing ever will be.
    pub fn try_get(&mut self) -> Result<Message, QueueError> {
        self.rx.try_recv().map_err(|e| match e {
            mpsc::error::TryRecvError::Empty => QueueError::Empty,
            mpsc::error::TryRecvError::Disconnected => QueueError::Closed,
        })
    }

    /// Number of values waiting
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
