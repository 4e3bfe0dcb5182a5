//! Reaction toggling.
//!
//! A reaction is a `(user, emoji)` pair. Toggling inserts the pair when it
//! is absent and removes it when present. Toggles on the same message are
//! serialized so concurrent reactions never lose updates or duplicate pairs.

use parley_protocol::{ChatMessage, Reaction};
use tracing::debug;

use crate::lock::KeyedLocks;
use crate::router::RouterError;
use crate::store::MessageStore;

/// What a toggle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Added,
    Removed,
}

/// Toggle `(user, emoji)` in a reaction list.
///
/// Removal drops every matching pair, so a list that somehow held duplicates
/// ends up with none.
pub fn toggle_reaction(reactions: &mut Vec<Reaction>, user: &str, emoji: &str) -> Toggle {
    let before = reactions.len();
    reactions.retain(|r| !(r.user == user && r.emoji == emoji));

    if reactions.len() == before {
        reactions.push(Reaction::new(user, emoji));
        Toggle::Added
    } else {
        Toggle::Removed
    }
}

/// Serializes reaction updates per message.
#[derive(Debug, Default)]
pub struct ReactionEngine {
    locks: KeyedLocks,
}

impl ReactionEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load, toggle and persist the reactions of one message.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::MessageNotFound`] if the message does not exist
    /// and [`RouterError::PersistenceFailed`] if the store fails.
    pub async fn toggle<S>(
        &self,
        store: &S,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<ChatMessage, RouterError>
    where
        S: MessageStore + ?Sized,
    {
        let _guard = self.locks.acquire(message_id).await;

        let mut message = store
            .find_message(message_id)
            .await?
            .ok_or_else(|| RouterError::MessageNotFound(message_id.to_string()))?;

        let toggle = toggle_reaction(&mut message.reactions, user_id, emoji);
        debug!(message = %message_id, user = %user_id, emoji = %emoji, ?toggle, "Reaction toggled");

        store
            .save_reactions(message_id, message.reactions)
            .await?
            .ok_or_else(|| RouterError::MessageNotFound(message_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NewMessage;
    use crate::store::MemoryStore;
    use parley_protocol::MessageTarget;
    use std::sync::Arc;

    #[test]
    fn test_toggle_is_self_inverse() {
        let original = vec![Reaction::new("alice", "🎉")];
        let mut reactions = original.clone();

        assert_eq!(toggle_reaction(&mut reactions, "bob", "👍"), Toggle::Added);
        assert_eq!(reactions.len(), 2);
        assert_eq!(toggle_reaction(&mut reactions, "bob", "👍"), Toggle::Removed);
        assert_eq!(reactions, original);
    }

    #[test]
    fn test_pairs_are_independent() {
        let mut reactions = Vec::new();
        toggle_reaction(&mut reactions, "bob", "👍");
        toggle_reaction(&mut reactions, "bob", "🎉");
        toggle_reaction(&mut reactions, "alice", "👍");
        assert_eq!(reactions.len(), 3);

        toggle_reaction(&mut reactions, "bob", "👍");
        assert_eq!(reactions.len(), 2);
        assert!(!reactions.contains(&Reaction::new("bob", "👍")));
    }

    #[test]
    fn test_removal_collapses_duplicates() {
        let mut reactions = vec![Reaction::new("bob", "👍"), Reaction::new("bob", "👍")];
        assert_eq!(toggle_reaction(&mut reactions, "bob", "👍"), Toggle::Removed);
        assert!(reactions.is_empty());
    }

    async fn stored_message(store: &MemoryStore) -> ChatMessage {
        store
            .create_message(NewMessage {
                sender: "alice".into(),
                target: MessageTarget::Room("general".into()),
                text: "hi".into(),
                file: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_engine_persists_toggle() {
        let store = MemoryStore::new();
        let engine = ReactionEngine::new();
        let message = stored_message(&store).await;

        let updated = engine.toggle(&store, &message.id, "bob", "👍").await.unwrap();
        assert_eq!(updated.reactions, vec![Reaction::new("bob", "👍")]);
        assert_eq!(store.message(&message.id).unwrap().reactions.len(), 1);

        let updated = engine.toggle(&store, &message.id, "bob", "👍").await.unwrap();
        assert!(updated.reactions.is_empty());
        assert_eq!(engine.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_engine_missing_message() {
        let store = MemoryStore::new();
        let engine = ReactionEngine::new();
        assert!(matches!(
            engine.toggle(&store, "missing", "bob", "👍").await,
            Err(RouterError::MessageNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_toggles_keep_pairs_unique() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(ReactionEngine::new());
        let message = stored_message(&store).await;

        // 8 users each toggle the same emoji 3 times: every user ends up
        // with exactly one reaction.
        let mut tasks = Vec::new();
        for user in 0..8 {
            for _ in 0..3 {
                let store = Arc::clone(&store);
                let engine = Arc::clone(&engine);
                let id = message.id.clone();
                tasks.push(tokio::spawn(async move {
                    engine
                        .toggle(store.as_ref(), &id, &format!("user-{}", user), "👍")
                        .await
                        .unwrap();
                }));
            }
        }
        for task in tasks {
            task.await.unwrap();
        }

        let reactions = store.message(&message.id).unwrap().reactions;
        assert_eq!(reactions.len(), 8);
        for user in 0..8 {
            let name = format!("user-{}", user);
            assert_eq!(reactions.iter().filter(|r| r.user == name).count(), 1);
        }
    }
}
