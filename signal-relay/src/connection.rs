//! Handles to accepted WebSocket connections.
//!
//! A [`Connection`] is the sending half of a bounded queue drained by the
//! connection's writer task. Rooms keep clones of it for fan-out; the socket
//! itself is owned by the handler that accepted it.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use uuid::Uuid;

/// Identity of a connection, assigned once when it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new time-ordered identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a message could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection's writer has shut down.
    #[error("connection closed")]
    Closed,
    /// The outbound queue stayed full past the send deadline.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    /// The outbound queue had no room for a frame that cannot wait.
    #[error("outbound queue full")]
    Full,
}

/// Cloneable sending handle for one connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Message>,
}

impl Connection {
    /// Wraps an existing outbound queue under a fresh identity.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
        }
    }

    /// Creates a connection together with the receiver its writer drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Returns this connection's identity.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` once the writer side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queues a text frame, waiting at most `deadline` for queue space.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the writer is gone, or
    /// [`SendError::Timeout`] if the queue did not drain in time.
    pub async fn send(&self, text: Utf8Bytes, deadline: Duration) -> Result<(), SendError> {
        self.tx
            .send_timeout(Message::Text(text), deadline)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Closed(_) => SendError::Closed,
                SendTimeoutError::Timeout(_) => SendError::Timeout(deadline),
            })
    }

    /// Queues a close frame without waiting.
    ///
    /// The writer stops after sending it, which completes the closing
    /// handshake for a peer that closed first.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the writer is gone, or
    /// [`SendError::Full`] if the queue has no free slot.
    pub fn close(&self, frame: Option<CloseFrame>) -> Result<(), SendError> {
        self.tx.try_send(Message::Close(frame)).map_err(|e| match e {
            TrySendError::Closed(_) => SendError::Closed,
            TrySendError::Full(_) => SendError::Full,
        })
    }
}
