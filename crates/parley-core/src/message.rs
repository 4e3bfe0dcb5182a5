//! Message drafts and identifiers.
//!
//! A [`NewMessage`] is a validated `send_message` payload that has not been
//! persisted yet. The store turns it into a [`ChatMessage`] with an id and a
//! timestamp.

use parley_protocol::{ChatMessage, FileDescriptor, MessageId, MessageTarget, SendMessage, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::router::RouterError;

/// Per-process sequence number; unique on its own within a process.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process start time, separating ids across restarts.
static ID_EPOCH: OnceLock<u64> = OnceLock::new();

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a unique message ID: 16 hex digits of process epoch followed by
/// 8 or more hex digits of sequence.
#[must_use]
pub fn generate_message_id() -> MessageId {
    let epoch = *ID_EPOCH.get_or_init(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64
    });
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:016x}{:08x}", epoch, counter)
}

/// A validated message waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: UserId,
    pub target: MessageTarget,
    pub text: String,
    pub file: Option<FileDescriptor>,
}

impl NewMessage {
    /// Validate a `send_message` payload from `sender`.
    ///
    /// # Errors
    ///
    /// - [`RouterError::InvalidTarget`] unless exactly one of room / receiver is set
    /// - [`RouterError::EmptyMessage`] if there is neither text nor a file
    /// - [`RouterError::MessageTooLong`] if the text exceeds `max_text_length`
    pub fn from_payload(
        sender: impl Into<UserId>,
        payload: SendMessage,
        max_text_length: usize,
    ) -> Result<Self, RouterError> {
        let target = resolve_target(payload.room_id, payload.receiver_id)?;

        let text = payload.text.unwrap_or_default();
        if text.is_empty() && payload.file.is_none() {
            return Err(RouterError::EmptyMessage);
        }
        if text.len() > max_text_length {
            return Err(RouterError::MessageTooLong(max_text_length));
        }

        Ok(Self {
            sender: sender.into(),
            target,
            text,
            file: payload.file,
        })
    }

    /// Turn the draft into a stored message.
    #[must_use]
    pub fn into_message(self, id: MessageId, created_at: u64) -> ChatMessage {
        ChatMessage {
            id,
            sender: self.sender,
            target: self.target,
            text: self.text,
            file: self.file,
            is_read: false,
            reactions: Vec::new(),
            created_at,
        }
    }
}

/// Pick the single target named by an inbound payload.
///
/// # Errors
///
/// Returns [`RouterError::InvalidTarget`] when both or neither are present.
pub fn resolve_target(
    room_id: Option<String>,
    receiver_id: Option<String>,
) -> Result<MessageTarget, RouterError> {
    match (room_id, receiver_id) {
        (Some(room), None) if !room.is_empty() => Ok(MessageTarget::Room(room)),
        (None, Some(user)) if !user.is_empty() => Ok(MessageTarget::Direct(user)),
        _ => Err(RouterError::InvalidTarget),
    }
}
