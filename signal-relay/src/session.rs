//! Per-connection relay loop.
//!
//! A [`Session`] exists only for connections the registry accepted. It owns
//! the membership: dropping it removes the connection from its room, which
//! happens exactly once whether the loop ended cleanly, on a transport error,
//! or because its task was aborted.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes};
use futures_util::{Stream, StreamExt};
use signal_proto::Role;

use crate::connection::{Connection, ConnectionId};
use crate::registry::{GroupRegistry, JoinError};

/// Result of relaying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayOutcome {
    /// Recipients the message was queued for.
    pub delivered: usize,
    /// Recipients removed from the room because delivery failed.
    pub evicted: usize,
}

/// An accepted connection's membership in a room.
#[derive(Debug)]
pub struct Session {
    registry: Arc<GroupRegistry>,
    room: String,
    role: Role,
    connection: Connection,
    send_timeout: Duration,
}

impl Session {
    /// Registers `connection` in `room` and returns the session that owns
    /// that membership.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError`] when the registry refuses the join; nothing is
    /// registered and no cleanup is needed.
    pub fn join(
        registry: Arc<GroupRegistry>,
        room: &str,
        role: Role,
        connection: Connection,
        send_timeout: Duration,
    ) -> Result<Self, JoinError> {
        registry.join(room, role, connection.clone())?;
        tracing::info!(
            room = %room,
            role = %role,
            connection = %connection.id(),
            "connection joined room"
        );
        Ok(Self {
            registry,
            room: room.to_string(),
            role,
            connection,
            send_timeout,
        })
    }

    /// Room this session belongs to.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Role this session was accepted under.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Identity of the underlying connection.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Consumes inbound frames until the peer closes or the transport fails.
    ///
    /// A peer's close frame is echoed back through this connection's own
    /// outbound queue so the writer can finish the closing handshake.
    ///
    /// Each message is fully relayed before the next one is read, so messages
    /// from one sender reach each recipient in order.
    pub async fn run<R, E>(&self, reader: &mut R)
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: std::fmt::Display,
    {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    self.handle_text(text).await;
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(connection = %self.id(), "received close frame");
                    if let Err(e) = self.connection.close(frame) {
                        tracing::debug!(connection = %self.id(), error = %e, "close reply not queued");
                    }
                    break;
                }
                Ok(Message::Binary(data)) => {
                    tracing::debug!(
                        connection = %self.id(),
                        len = data.len(),
                        "ignoring binary frame"
                    );
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(e) => {
                    tracing::error!(
                        room = %self.room,
                        connection = %self.id(),
                        error = %e,
                        "websocket error"
                    );
                    break;
                }
            }
        }
    }

    /// Inspects one text frame and relays it if it is a JSON object.
    async fn handle_text(&self, text: Utf8Bytes) {
        match signal_proto::inspect(text.as_str()) {
            Ok(signal) => {
                tracing::info!(
                    room = %self.room,
                    role = %self.role,
                    kind = signal.kind_or_unknown(),
                    "received signal"
                );
                let outcome = self.relay(text).await;
                tracing::debug!(
                    room = %self.room,
                    delivered = outcome.delivered,
                    evicted = outcome.evicted,
                    "signal relayed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    room = %self.room,
                    connection = %self.id(),
                    error = %e,
                    "dropping invalid signal"
                );
            }
        }
    }

    /// Forwards `text` verbatim according to this session's role.
    ///
    /// A publisher's message goes to every current subscriber; a subscriber's
    /// message goes to the publisher, or nowhere if there is none. Recipients
    /// that cannot take the message within the send deadline are evicted.
    pub async fn relay(&self, text: Utf8Bytes) -> RelayOutcome {
        match self.role {
            Role::Publisher => self.fan_out(text).await,
            Role::Subscriber => self.forward_to_publisher(text).await,
        }
    }

    async fn fan_out(&self, text: Utf8Bytes) -> RelayOutcome {
        let subscribers = self.registry.subscribers(&self.room);
        let sends = subscribers.iter().map(|subscriber| {
            let text = text.clone();
            async move { (subscriber.id(), subscriber.send(text, self.send_timeout).await) }
        });

        let mut outcome = RelayOutcome::default();
        for (id, result) in futures_util::future::join_all(sends).await {
            match result {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    if self.registry.evict_subscriber(&self.room, id) {
                        outcome.evicted += 1;
                    }
                    tracing::warn!(
                        room = %self.room,
                        subscriber = %id,
                        error = %e,
                        "evicting unreachable subscriber"
                    );
                }
            }
        }
        outcome
    }

    async fn forward_to_publisher(&self, text: Utf8Bytes) -> RelayOutcome {
        let Some(publisher) = self.registry.publisher(&self.room) else {
            tracing::debug!(room = %self.room, "no publisher, dropping signal");
            return RelayOutcome::default();
        };

        match publisher.send(text, self.send_timeout).await {
            Ok(()) => RelayOutcome {
                delivered: 1,
                evicted: 0,
            },
            Err(e) => {
                let evicted = self.registry.evict_publisher(&self.room, publisher.id());
                tracing::warn!(
                    room = %self.room,
                    publisher = %publisher.id(),
                    error = %e,
                    "evicting unreachable publisher"
                );
                RelayOutcome {
                    delivered: 0,
                    evicted: usize::from(evicted),
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.registry.leave(&self.room, self.role, self.connection.id());
        tracing::info!(
            room = %self.room,
            role = %self.role,
            connection = %self.connection.id(),
            "connection left room"
        );
    }
}
