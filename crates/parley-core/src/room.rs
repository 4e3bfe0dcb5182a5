//! Room membership index.
//!
//! Mirrors persisted room membership and tracks which live connections are
//! subscribed to each room's broadcasts. The store stays the source of truth
//! for membership; the index is refreshed on every join and leave.

use dashmap::DashMap;
use parley_protocol::{RoomId, UserId};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::registry::ConnectionId;

/// Maximum room id length.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Validate a room id before it reaches the store.
///
/// # Errors
///
/// Returns an error message if the id is empty, too long or not printable.
pub fn validate_room_id(room_id: &str) -> Result<(), &'static str> {
    if room_id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if room_id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if room_id.chars().any(char::is_control) {
        return Err("Room id contains invalid characters");
    }
    Ok(())
}

/// Cached state for one room.
#[derive(Debug, Default)]
struct RoomEntry {
    /// Mirror of the persisted member set.
    members: HashSet<UserId>,
    /// Subscribed connections and the user owning each.
    subscribers: HashMap<ConnectionId, UserId>,
}

impl RoomEntry {
    fn user_subscribed(&self, user_id: &str) -> bool {
        self.subscribers.values().any(|owner| owner == user_id)
    }
}

/// Index of room members and subscribed connections.
#[derive(Debug)]
pub struct RoomIndex {
    rooms: DashMap<RoomId, RoomEntry>,
    auto_delete_empty: bool,
}

impl Default for RoomIndex {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RoomIndex {
    /// Create an index. With `auto_delete_empty`, rooms without subscribers
    /// are dropped from the cache.
    #[must_use]
    pub fn new(auto_delete_empty: bool) -> Self {
        Self {
            rooms: DashMap::new(),
            auto_delete_empty,
        }
    }

    /// Subscribe a connection and refresh the member mirror.
    ///
    /// Subscribing twice is harmless. Returns the number of subscribers.
    pub fn subscribe<I>(
        &self,
        room_id: &str,
        user_id: &str,
        connection_id: &ConnectionId,
        members: I,
    ) -> usize
    where
        I: IntoIterator<Item = UserId>,
    {
        let mut entry = self.rooms.entry(room_id.to_string()).or_default();
        entry.members = members.into_iter().collect();
        entry.members.insert(user_id.to_string());
        entry
            .subscribers
            .insert(connection_id.clone(), user_id.to_string());

        debug!(
            room = %room_id,
            connection = %connection_id,
            subscribers = entry.subscribers.len(),
            members = entry.members.len(),
            "Subscribed to room"
        );

        entry.subscribers.len()
    }

    /// Remove a connection's subscription.
    ///
    /// Returns whether the user still has another connection subscribed.
    pub fn unsubscribe(&self, room_id: &str, user_id: &str, connection_id: &ConnectionId) -> bool {
        let Some(mut entry) = self.rooms.get_mut(room_id) else {
            return false;
        };

        entry.subscribers.remove(connection_id);
        let user_still_subscribed = entry.user_subscribed(user_id);

        debug!(
            room = %room_id,
            connection = %connection_id,
            subscribers = entry.subscribers.len(),
            "Unsubscribed from room"
        );

        self.prune(room_id, entry);

        user_still_subscribed
    }

    /// Replace the member mirror after a persisted membership change.
    pub fn set_members<I>(&self, room_id: &str, members: I)
    where
        I: IntoIterator<Item = UserId>,
    {
        if let Some(mut entry) = self.rooms.get_mut(room_id) {
            entry.members = members.into_iter().collect();
        }
    }

    /// Drop every subscription of a departed connection.
    ///
    /// Membership is left untouched.
    pub fn drop_connection<'a, I>(&self, connection_id: &ConnectionId, rooms: I)
    where
        I: IntoIterator<Item = &'a RoomId>,
    {
        for room_id in rooms {
            if let Some(mut entry) = self.rooms.get_mut(room_id.as_str()) {
                entry.subscribers.remove(connection_id);
                self.prune(room_id, entry);
            }
        }
        debug!(connection = %connection_id, "Dropped all room subscriptions");
    }

    /// All connections subscribed to a room.
    #[must_use]
    pub fn broadcast_audience(&self, room_id: &str) -> HashSet<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.subscribers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Cached members of a room.
    #[must_use]
    pub fn members(&self, room_id: &str) -> HashSet<UserId> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.members.clone())
            .unwrap_or_default()
    }

    /// Check whether a connection is subscribed to a room.
    #[must_use]
    pub fn is_subscribed(&self, room_id: &str, connection_id: &ConnectionId) -> bool {
        self.rooms
            .get(room_id)
            .map(|entry| entry.subscribers.contains_key(connection_id))
            .unwrap_or(false)
    }

    /// Number of connections subscribed to a room.
    #[must_use]
    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Check if a room is cached.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of cached rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn prune(&self, room_id: &str, entry: dashmap::mapref::one::RefMut<'_, RoomId, RoomEntry>) {
        if self.auto_delete_empty && entry.subscribers.is_empty() {
            drop(entry); // Release the lock
            self.rooms.remove_if(room_id, |_, e| e.subscribers.is_empty());
            debug!(room = %room_id, "Dropped empty room");
        }
    }
}
