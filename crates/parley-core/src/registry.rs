//! Connection registry.
//!
//! Maps live connections to their users and users to their live connections.
//! A user may hold any number of concurrent connections; every one of them
//! is part of the user's delivery audience.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_protocol::{RoomId, ServerEvent, UserId};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, trace};


/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedSender<Arc<ServerEvent>>;

/// Receiving half of a connection's outbound queue.
pub type Inbox = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

/// Create a new outbound queue for a connection.
#[must_use]
pub fn outbox() -> (Outbox, Inbox) {
    mpsc::unbounded_channel()
}

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// State held for one live connection.
#[derive(Debug)]
pub struct ConnectionRecord {
    /// The authenticated user owning the connection.
    pub user_id: UserId,
    /// Rooms this connection is subscribed to.
    pub joined_rooms: HashSet<RoomId>,
    outbox: Outbox,
}

/// Aggregate online state change caused by a registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// The user went from zero to one live connection.
    CameOnline,
    /// The user went from one to zero live connections.
    WentOffline,
    /// The aggregate online state did not change.
    Unchanged,
}

/// A connection removed from the registry.
#[derive(Debug)]
pub struct Departed {
    pub user_id: UserId,
    pub joined_rooms: HashSet<RoomId>,
    pub change: PresenceChange,
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the event was queued for.
    pub delivered: usize,
    /// Audience members that were gone or closed.
    pub skipped: usize,
}

impl DeliveryReport {
    /// Merge another report into this one.
    pub fn absorb(&mut self, other: DeliveryReport) {
        self.delivered += other.delivered;
        self.skipped += other.skipped;
    }
}

/// The registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Connection records indexed by connection id.
    connections: DashMap<ConnectionId, ConnectionRecord>,
    /// Live connections per user. A user is online while present here.
    users: DashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live connection for `user_id`.
    ///
    /// Re-registering an existing connection id replaces its outbox and
    /// never changes presence.
    pub fn register(
        &self,
        user_id: impl Into<UserId>,
        connection_id: ConnectionId,
        outbox: Outbox,
    ) -> PresenceChange {
        let user_id = user_id.into();

        self.connections.insert(
            connection_id.clone(),
            ConnectionRecord {
                user_id: user_id.clone(),
                joined_rooms: HashSet::new(),
                outbox,
            },
        );

        let mut live = self.users.entry(user_id.clone()).or_default();
        let inserted = live.insert(connection_id.clone());
        let change = if inserted && live.len() == 1 {
            PresenceChange::CameOnline
        } else {
            PresenceChange::Unchanged
        };

        debug!(
            connection = %connection_id,
            user = %user_id,
            connections = live.len(),
            "Connection registered"
        );

        change
    }

    /// Remove a connection. Unknown ids are a no-op.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<Departed> {
        let (_, record) = self.connections.remove(connection_id)?;

        let change = match self.users.entry(record.user_id.clone()) {
            Entry::Occupied(mut live) => {
                live.get_mut().remove(connection_id);
                if live.get().is_empty() {
                    live.remove();
                    PresenceChange::WentOffline
                } else {
                    PresenceChange::Unchanged
                }
            }
            Entry::Vacant(_) => PresenceChange::Unchanged,
        };

        debug!(
            connection = %connection_id,
            user = %record.user_id,
            ?change,
            "Connection unregistered"
        );

        Some(Departed {
            user_id: record.user_id,
            joined_rooms: record.joined_rooms,
            change,
        })
    }

    /// All live connections of a user. Empty means unreachable right now.
    #[must_use]
    pub fn resolve_connections(&self, user_id: &str) -> HashSet<ConnectionId> {
        self.users
            .get(user_id)
            .map(|live| live.clone())
            .unwrap_or_default()
    }

    /// The user owning a connection.
    #[must_use]
    pub fn user_of(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.connections
            .get(connection_id)
            .map(|record| record.user_id.clone())
    }

    /// Every registered connection.
    #[must_use]
    pub fn all_connections(&self) -> HashSet<ConnectionId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Check whether a user has at least one live connection.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Number of users currently online.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.users.len()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Rooms a connection is subscribed to.
    #[must_use]
    pub fn joined_rooms(&self, connection_id: &ConnectionId) -> HashSet<RoomId> {
        self.connections
            .get(connection_id)
            .map(|record| record.joined_rooms.clone())
            .unwrap_or_default()
    }

    /// Note that a connection subscribed to a room.
    pub fn track_room(&self, connection_id: &ConnectionId, room_id: &str) {
        if let Some(mut record) = self.connections.get_mut(connection_id) {
            record.joined_rooms.insert(room_id.to_string());
        }
    }

    /// Note that a connection left a room.
    pub fn untrack_room(&self, connection_id: &ConnectionId, room_id: &str) {
        if let Some(mut record) = self.connections.get_mut(connection_id) {
            record.joined_rooms.remove(room_id);
        }
    }

    /// Queue an event for a single connection.
    ///
    /// Returns `false` if the connection is unknown or its queue is closed.
    pub fn send_to(&self, connection_id: &ConnectionId, event: Arc<ServerEvent>) -> bool {
        match self.connections.get(connection_id) {
            Some(record) => record.outbox.send(event).is_ok(),
            None => false,
        }
    }

    /// Queue an event for every connection in `audience`, best-effort.
    pub fn deliver<'a, I>(&self, audience: I, event: ServerEvent) -> DeliveryReport
    where
        I: IntoIterator<Item = &'a ConnectionId>,
    {
        let kind = event.kind();
        let event = Arc::new(event);
        let mut report = DeliveryReport::default();

        for connection_id in audience {
            if self.send_to(connection_id, Arc::clone(&event)) {
                report.delivered += 1;
            } else {
                trace!(connection = %connection_id, event = %kind, "Skipped unreachable connection");
                report.skipped += 1;
            }
        }

        trace!(
            event = %kind,
            delivered = report.delivered,
            skipped = report.skipped,
            "Delivered"
        );
        report
    }
}
