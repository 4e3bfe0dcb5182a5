//! Persistence collaborators.
//!
//! The router never owns durable state. Messages, rooms and user profiles
//! live behind these traits; [`MemoryStore`] is a process-local
//! implementation used by the server binary and the tests.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_protocol::{ChatMessage, MessageId, Reaction, RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

use crate::message::{generate_message_id, now_millis, NewMessage};

/// Errors raised by a persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the write.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure.
    #[error("Store error: {0}")]
    Backend(String),
}

/// Public profile of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// A room as persisted, with its member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub name: String,
    pub members: Vec<UserId>,
}

/// Create, find and update messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a draft, assigning its id and timestamp.
    async fn create_message(&self, draft: NewMessage) -> Result<ChatMessage, StoreError>;

    /// Load a message.
    async fn find_message(&self, id: &str) -> Result<Option<ChatMessage>, StoreError>;

    /// Mark a message as read, returning the updated message.
    async fn mark_read(&self, id: &str) -> Result<Option<ChatMessage>, StoreError>;

    /// Replace a message's reaction list, returning the updated message.
    async fn save_reactions(
        &self,
        id: &str,
        reactions: Vec<Reaction>,
    ) -> Result<Option<ChatMessage>, StoreError>;
}

/// Persisted room membership.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Add a member (set semantics). `None` if the room does not exist.
    async fn add_member(&self, room_id: &str, user_id: &str)
        -> Result<Option<RoomSnapshot>, StoreError>;

    /// Remove a member. `None` if the room does not exist.
    async fn remove_member(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<RoomSnapshot>, StoreError>;
}

/// User profile lookup and presence bookkeeping.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a user's public profile.
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    /// Record a user's aggregate online flag and last-seen time.
    async fn set_presence(&self, user_id: &str, online: bool, at: u64) -> Result<(), StoreError>;
}

/// Everything the router needs from the outside world.
pub trait ChatStore: MessageStore + RoomStore + UserDirectory {}

impl<T: MessageStore + RoomStore + UserDirectory> ChatStore for T {}

#[derive(Debug, Clone)]
struct UserRecord {
    profile: UserProfile,
    is_online: bool,
    last_seen: Option<u64>,
}

/// In-memory implementation of every store trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: DashMap<MessageId, ChatMessage>,
    rooms: DashMap<RoomId, RoomSnapshot>,
    users: DashMap<UserId, UserRecord>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room with no members, replacing any existing one.
    pub fn add_room(&self, id: impl Into<RoomId>, name: impl Into<String>) {
        let id = id.into();
        debug!(room = %id, "Seeding room");
        self.rooms.insert(
            id.clone(),
            RoomSnapshot {
                id,
                name: name.into(),
                members: Vec::new(),
            },
        );
    }

    /// Create or replace a user profile.
    pub fn add_user(&self, profile: UserProfile) {
        self.users.insert(
            profile.id.clone(),
            UserRecord {
                profile,
                is_online: false,
                last_seen: None,
            },
        );
    }

    /// Make every subsequent write fail with [`StoreError::Unavailable`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Get a stored room.
    #[must_use]
    pub fn room(&self, id: &str) -> Option<RoomSnapshot> {
        self.rooms.get(id).map(|room| room.clone())
    }

    /// Get a stored message.
    #[must_use]
    pub fn message(&self, id: &str) -> Option<ChatMessage> {
        self.messages.get(id).map(|message| message.clone())
    }

    /// Number of stored messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Recorded online flag and last-seen time of a user.
    #[must_use]
    pub fn presence_of(&self, user_id: &str) -> Option<(bool, Option<u64>)> {
        self.users
            .get(user_id)
            .map(|user| (user.is_online, user.last_seen))
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(&self, draft: NewMessage) -> Result<ChatMessage, StoreError> {
        self.check_writable()?;
        let message = draft.into_message(generate_message_id(), now_millis());
        match self.messages.entry(message.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Backend(format!(
                "Duplicate message id: {}",
                message.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(message.clone());
                Ok(message)
            }
        }
    }

    async fn find_message(&self, id: &str) -> Result<Option<ChatMessage>, StoreError> {
        Ok(self.message(id))
    }

    async fn mark_read(&self, id: &str) -> Result<Option<ChatMessage>, StoreError> {
        self.check_writable()?;
        Ok(self.messages.get_mut(id).map(|mut message| {
            message.is_read = true;
            message.clone()
        }))
    }

    async fn save_reactions(
        &self,
        id: &str,
        reactions: Vec<Reaction>,
    ) -> Result<Option<ChatMessage>, StoreError> {
        self.check_writable()?;
        Ok(self.messages.get_mut(id).map(|mut message| {
            message.reactions = reactions;
            message.clone()
        }))
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn add_member(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<RoomSnapshot>, StoreError> {
        self.check_writable()?;
        Ok(self.rooms.get_mut(room_id).map(|mut room| {
            if !room.members.iter().any(|member| member == user_id) {
                room.members.push(user_id.to_string());
            }
            room.clone()
        }))
    }

    async fn remove_member(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<RoomSnapshot>, StoreError> {
        self.check_writable()?;
        Ok(self.rooms.get_mut(room_id).map(|mut room| {
            room.members.retain(|member| member != user_id);
            room.clone()
        }))
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.users.get(user_id).map(|user| user.profile.clone()))
    }

    async fn set_presence(&self, user_id: &str, online: bool, at: u64) -> Result<(), StoreError> {
        self.check_writable()?;
        if let Some(mut user) = self.users.get_mut(user_id) {
            user.is_online = online;
            user.last_seen = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::MessageTarget;

    fn draft(text: &str) -> NewMessage {
        NewMessage {
            sender: "alice".into(),
            target: MessageTarget::Room("general".into()),
            text: text.into(),
            file: None,
        }
    }

    #[tokio::test]
    async fn test_membership_has_set_semantics() {
        let store = MemoryStore::new();
        store.add_room("general", "General");

        store.add_member("general", "alice").await.unwrap();
        let room = store.add_member("general", "alice").await.unwrap().unwrap();
        assert_eq!(room.members, vec!["alice".to_string()]);

        let room = store.remove_member("general", "alice").await.unwrap().unwrap();
        assert!(room.members.is_empty());

        assert!(store.add_member("missing", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_lifecycle() {
        let store = MemoryStore::new();
        let message = store.create_message(draft("hi")).await.unwrap();
        assert_eq!(store.message_count(), 1);

        let read = store.mark_read(&message.id).await.unwrap().unwrap();
        assert!(read.is_read);

        let updated = store
            .save_reactions(&message.id, vec![Reaction::new("bob", "👍")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.reactions.len(), 1);

        assert!(store.mark_read("missing").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_keep_every_message() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    store.create_message(draft(&format!("m{}", i))).await.unwrap()
                })
            })
            .collect();

        for task in tasks {
            let message = task.await.unwrap();
            assert!(store.message(&message.id).is_some());
        }
        assert_eq!(store.message_count(), 64);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        assert!(matches!(
            store.create_message(draft("hi")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.message_count(), 0);
    }

    #[tokio::test]
    async fn test_presence_bookkeeping() {
        let store = MemoryStore::new();
        store.add_user(UserProfile {
            id: "alice".into(),
            username: "Alice".into(),
            avatar: None,
        });

        store.set_presence("alice", true, 10).await.unwrap();
        assert_eq!(store.presence_of("alice"), Some((true, Some(10))));
        store.set_presence("alice", false, 20).await.unwrap();
        assert_eq!(store.presence_of("alice"), Some((false, Some(20))));
    }
}
