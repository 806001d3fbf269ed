//! Group registry for the relay server.
//!
//! Maps a room key to its membership: at most one publisher and any number
//! of subscribers. Rooms are created lazily on first join and kept for the
//! lifetime of the process, so a room that empties out is still counted.
//!
//! The outer map is locked only to find or create a room. Each room has its
//! own mutex, so rooms never contend with one another, and no lock is held
//! while a message is being delivered.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use signal_proto::{PUBLISHER_PRESENT_REASON, Role};

use crate::connection::{Connection, ConnectionId};

/// Why a join was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// The room already has a live publisher.
    #[error("{PUBLISHER_PRESENT_REASON}")]
    PublisherPresent,
}

/// Membership of a single room.
#[derive(Debug, Default)]
pub struct Group {
    publisher: Option<Connection>,
    subscribers: HashMap<ConnectionId, Connection>,
}

impl Group {
    /// Id of the current publisher, if any.
    #[must_use]
    pub fn publisher_id(&self) -> Option<ConnectionId> {
        self.publisher.as_ref().map(Connection::id)
    }

    /// Number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether `id` is currently a subscriber.
    #[must_use]
    pub fn has_subscriber(&self, id: ConnectionId) -> bool {
        self.subscribers.contains_key(&id)
    }

    /// Subscribers plus one if a publisher is present.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.subscribers.len() + usize::from(self.publisher.is_some())
    }

    /// Clears the publisher slot only if it still holds `id`.
    fn clear_publisher_if(&mut self, id: ConnectionId) -> bool {
        if self.publisher_id() == Some(id) {
            self.publisher = None;
            true
        } else {
            false
        }
    }
}

/// Point-in-time counts for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistrySnapshot {
    /// Number of rooms, empty ones included.
    pub rooms: usize,
    /// Sum over rooms of subscribers plus one per present publisher.
    pub active_connections: usize,
}

/// All rooms known to the relay.
///
/// Constructed once at server start and shared with every connection
/// handler through [`crate::relay::RelayState`].
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Arc<Mutex<Group>>>>,
}

impl GroupRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the room for `room`, creating it if needed.
    fn group_or_create(&self, room: &str) -> Arc<Mutex<Group>> {
        if let Some(group) = self.groups.read().get(room) {
            return Arc::clone(group);
        }
        let mut groups = self.groups.write();
        Arc::clone(groups.entry(room.to_string()).or_default())
    }

    /// Returns the room for `room` without creating it.
    fn group(&self, room: &str) -> Option<Arc<Mutex<Group>>> {
        self.groups.read().get(room).cloned()
    }

    /// Adds `connection` to `room` under `role`.
    ///
    /// Subscribers are always accepted; joining twice is a no-op. A publisher
    /// is accepted only if the room has no live publisher. A recorded
    /// publisher whose writer has already shut down does not count as live and
    /// is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::PublisherPresent`] if another live publisher holds
    /// the room. Nothing is registered in that case.
    pub fn join(&self, room: &str, role: Role, connection: Connection) -> Result<(), JoinError> {
        let group = self.group_or_create(room);
        let mut group = group.lock();
        match role {
            Role::Publisher => {
                if let Some(current) = &group.publisher {
                    if !current.is_closed() {
                        return Err(JoinError::PublisherPresent);
                    }
                    tracing::info!(
                        room = %room,
                        stale = %current.id(),
                        "replacing publisher whose connection already closed"
                    );
                }
                group.publisher = Some(connection);
            }
            Role::Subscriber => {
                group
                    .subscribers
                    .entry(connection.id())
                    .or_insert(connection);
            }
        }
        Ok(())
    }

    /// Removes connection `id` from `room`.
    ///
    /// For a publisher the slot is cleared only if it still refers to `id`, so
    /// a departing publisher never clears a replacement that joined after it.
    pub fn leave(&self, room: &str, role: Role, id: ConnectionId) {
        let Some(group) = self.group(room) else {
            return;
        };
        let mut group = group.lock();
        match role {
            Role::Publisher => {
                group.clear_publisher_if(id);
            }
            Role::Subscriber => {
                group.subscribers.remove(&id);
            }
        }
    }

    /// Snapshot of the current subscribers of `room`, for fan-out.
    #[must_use]
    pub fn subscribers(&self, room: &str) -> Vec<Connection> {
        self.group(room)
            .map(|group| group.lock().subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The current publisher of `room`, if any.
    #[must_use]
    pub fn publisher(&self, room: &str) -> Option<Connection> {
        self.group(room).and_then(|group| group.lock().publisher.clone())
    }

    /// Drops subscriber `id` from `room` after a failed delivery.
    ///
    /// Returns `true` if the subscriber was still present.
    pub fn evict_subscriber(&self, room: &str, id: ConnectionId) -> bool {
        self.group(room)
            .is_some_and(|group| group.lock().subscribers.remove(&id).is_some())
    }

    /// Clears the publisher of `room` after a failed delivery, if it is still `id`.
    ///
    /// Returns `true` if the slot was cleared.
    pub fn evict_publisher(&self, room: &str, id: ConnectionId) -> bool {
        self.group(room)
            .is_some_and(|group| group.lock().clear_publisher_if(id))
    }

    /// Runs `f` against the state of `room`, if it exists.
    pub fn with_group<T>(&self, room: &str, f: impl FnOnce(&Group) -> T) -> Option<T> {
        self.group(room).map(|group| f(&group.lock()))
    }

    /// Counts rooms and active connections.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let groups: Vec<Arc<Mutex<Group>>> = self.groups.read().values().cloned().collect();
        let active_connections = groups
            .iter()
            .map(|group| group.lock().active_connections())
            .sum();
        RegistrySnapshot {
            rooms: groups.len(),
            active_connections,
        }
    }
}
