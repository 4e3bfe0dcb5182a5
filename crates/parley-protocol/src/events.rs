//! Event types for the Parley protocol.
//!
//! Every frame is an adjacently tagged object of the form
//! `{"event": "<name>", "data": <payload>}`. Inbound and outbound events are
//! closed enums: anything not listed here fails to decode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user identity issued by the authentication layer.
pub type UserId = String;

/// Identifier of a persisted room.
pub type RoomId = String;

/// Identifier of a persisted message.
pub type MessageId = String;

/// Event names, used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    JoinRoom,
    LeaveRoom,
    SendMessage,
    Typing,
    MessageRead,
    Reaction,
    CallUser,
    AnswerCall,
    ConnectionSuccess,
    UserOnline,
    UserOffline,
    UserJoinedRoom,
    UserLeftRoom,
    ReceiveMessage,
    UserTyping,
    ReactionUpdated,
    IncomingCall,
    CallAnswered,
    Error,
}

impl EventKind {
    /// The wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JoinRoom => "join_room",
            EventKind::LeaveRoom => "leave_room",
            EventKind::SendMessage => "send_message",
            EventKind::Typing => "typing",
            EventKind::MessageRead => "message_read",
            EventKind::Reaction => "reaction",
            EventKind::CallUser => "call_user",
            EventKind::AnswerCall => "answer_call",
            EventKind::ConnectionSuccess => "connection_success",
            EventKind::UserOnline => "user_online",
            EventKind::UserOffline => "user_offline",
            EventKind::UserJoinedRoom => "user_joined_room",
            EventKind::UserLeftRoom => "user_left_room",
            EventKind::ReceiveMessage => "receive_message",
            EventKind::UserTyping => "user_typing",
            EventKind::ReactionUpdated => "reaction_updated",
            EventKind::IncomingCall => "incoming_call",
            EventKind::CallAnswered => "call_answered",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub filename: String,
    pub path: String,
    pub mime_type: String,
}

/// Where a message is delivered. A message has exactly one target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageTarget {
    /// Broadcast to everyone subscribed to the room.
    #[serde(rename = "room")]
    Room(RoomId),
    /// Direct message to a single user.
    #[serde(rename = "receiver")]
    Direct(UserId),
}

/// A single emoji reaction by one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reaction {
    pub user: UserId,
    pub emoji: String,
}

impl Reaction {
    #[must_use]
    pub fn new(user: impl Into<UserId>, emoji: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            emoji: emoji.into(),
        }
    }
}

/// A persisted chat message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: UserId,
    #[serde(flatten)]
    pub target: MessageTarget,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileDescriptor>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// Payload of `send_message`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileDescriptor>,
}

/// Payload of `typing`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub is_typing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
}

/// Payload of `reaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub message_id: MessageId,
    pub emoji: String,
}

/// Payload of `call_user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub receiver_id: UserId,
    #[serde(default)]
    pub signal_data: serde_json::Value,
}

/// Payload of `answer_call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAnswer {
    pub to: UserId,
    #[serde(default)]
    pub signal_data: serde_json::Value,
}

/// Events sent by an authenticated client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom(RoomId),
    LeaveRoom(RoomId),
    SendMessage(SendMessage),
    Typing(Typing),
    MessageRead(MessageId),
    Reaction(ReactionRequest),
    CallUser(CallRequest),
    AnswerCall(CallAnswer),
}

impl ClientEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::JoinRoom(_) => EventKind::JoinRoom,
            ClientEvent::LeaveRoom(_) => EventKind::LeaveRoom,
            ClientEvent::SendMessage(_) => EventKind::SendMessage,
            ClientEvent::Typing(_) => EventKind::Typing,
            ClientEvent::MessageRead(_) => EventKind::MessageRead,
            ClientEvent::Reaction(_) => EventKind::Reaction,
            ClientEvent::CallUser(_) => EventKind::CallUser,
            ClientEvent::AnswerCall(_) => EventKind::AnswerCall,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

/// Payload of `connection_success`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSuccess {
    pub user_id: UserId,
}

/// Payload of `user_online` and `user_offline`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
}

/// Payload of `user_joined_room` and `user_left_room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipNotice {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub members_count: usize,
}

/// Payload of `user_typing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub user_id: UserId,
    pub is_typing: bool,
}

/// Payload of the outbound `message_read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: MessageId,
}

/// Payload of `incoming_call` and `call_answered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSignal {
    pub from: UserId,
    pub signal_data: serde_json::Value,
}

/// Payload of `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub error: String,
}

/// Events delivered to one or more connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ConnectionSuccess(ConnectionSuccess),
    UserOnline(PresenceNotice),
    UserOffline(PresenceNotice),
    UserJoinedRoom(MembershipNotice),
    UserLeftRoom(MembershipNotice),
    ReceiveMessage(ChatMessage),
    UserTyping(TypingNotice),
    MessageRead(ReadReceipt),
    ReactionUpdated(ChatMessage),
    IncomingCall(CallSignal),
    CallAnswered(CallSignal),
    Error(ErrorNotice),
}

impl ServerEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::ConnectionSuccess(_) => EventKind::ConnectionSuccess,
            ServerEvent::UserOnline(_) => EventKind::UserOnline,
            ServerEvent::UserOffline(_) => EventKind::UserOffline,
            ServerEvent::UserJoinedRoom(_) => EventKind::UserJoinedRoom,
            ServerEvent::UserLeftRoom(_) => EventKind::UserLeftRoom,
            ServerEvent::ReceiveMessage(_) => EventKind::ReceiveMessage,
            ServerEvent::UserTyping(_) => EventKind::UserTyping,
            ServerEvent::MessageRead(_) => EventKind::MessageRead,
            ServerEvent::ReactionUpdated(_) => EventKind::ReactionUpdated,
            ServerEvent::IncomingCall(_) => EventKind::IncomingCall,
            ServerEvent::CallAnswered(_) => EventKind::CallAnswered,
            ServerEvent::Error(_) => EventKind::Error,
        }
    }

    /// Create a `connection_success` event.
    #[must_use]
    pub fn connection_success(user_id: impl Into<UserId>) -> Self {
        ServerEvent::ConnectionSuccess(ConnectionSuccess {
            user_id: user_id.into(),
        })
    }

    /// Create a `user_online` event.
    #[must_use]
    pub fn user_online(
        user_id: impl Into<UserId>,
        username: Option<String>,
        avatar: Option<String>,
    ) -> Self {
        ServerEvent::UserOnline(PresenceNotice {
            user_id: user_id.into(),
            username,
            avatar,
            last_seen: None,
        })
    }

    /// Create a `user_offline` event.
    #[must_use]
    pub fn user_offline(user_id: impl Into<UserId>, last_seen: u64) -> Self {
        ServerEvent::UserOffline(PresenceNotice {
            user_id: user_id.into(),
            username: None,
            avatar: None,
            last_seen: Some(last_seen),
        })
    }

    /// Create a `user_typing` event.
    #[must_use]
    pub fn user_typing(user_id: impl Into<UserId>, is_typing: bool) -> Self {
        ServerEvent::UserTyping(TypingNotice {
            user_id: user_id.into(),
            is_typing,
        })
    }

    /// Create an outbound `message_read` event.
    #[must_use]
    pub fn message_read(message_id: impl Into<MessageId>) -> Self {
        ServerEvent::MessageRead(ReadReceipt {
            message_id: message_id.into(),
        })
    }

    /// Create an `error` event.
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorNotice {
            error: error.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_shapes() {
        let join: ClientEvent =
            serde_json::from_value(json!({"event": "join_room", "data": "general"})).unwrap();
        assert_eq!(join, ClientEvent::JoinRoom("general".into()));

        let send: ClientEvent = serde_json::from_value(json!({
            "event": "send_message",
            "data": {"text": "hi", "roomId": "general"}
        }))
        .unwrap();
        match send {
            ClientEvent::SendMessage(payload) => {
                assert_eq!(payload.text.as_deref(), Some("hi"));
                assert_eq!(payload.room_id.as_deref(), Some("general"));
                assert!(payload.receiver_id.is_none());
                assert!(payload.file.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }

        let typing: ClientEvent = serde_json::from_value(json!({
            "event": "typing",
            "data": {"isTyping": true, "receiverId": "bob"}
        }))
        .unwrap();
        assert_eq!(typing.kind(), EventKind::Typing);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_value(json!({"event": "delete_everything", "data": {}}));
        assert!(result.is_err());

        // Payload of the wrong shape.
        let result: Result<ClientEvent, _> =
            serde_json::from_value(json!({"event": "reaction", "data": "nope"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_chat_message_has_single_flattened_target() {
        let message = ChatMessage {
            id: "m1".into(),
            sender: "alice".into(),
            target: MessageTarget::Room("general".into()),
            text: "hi".into(),
            file: None,
            is_read: false,
            reactions: vec![Reaction::new("bob", "👍")],
            created_at: 1_700_000_000_000,
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["room"], "general");
        assert!(value.get("receiver").is_none());
        assert_eq!(value["isRead"], false);
        assert_eq!(value["reactions"][0]["user"], "bob");
        assert_eq!(value["createdAt"], 1_700_000_000_000u64);

        let direct: ChatMessage = serde_json::from_value(json!({
            "id": "m2",
            "sender": "alice",
            "receiver": "bob",
            "text": "psst",
            "createdAt": 1
        }))
        .unwrap();
        assert_eq!(direct.target, MessageTarget::Direct("bob".into()));
        assert!(direct.reactions.is_empty());
    }

    #[test]
    fn test_server_event_shapes() {
        let value = serde_json::to_value(ServerEvent::user_offline("alice", 42)).unwrap();
        assert_eq!(value["event"], "user_offline");
        assert_eq!(value["data"]["userId"], "alice");
        assert_eq!(value["data"]["lastSeen"], 42);
        assert!(value["data"].get("username").is_none());

        let value = serde_json::to_value(ServerEvent::error("Room not found")).unwrap();
        assert_eq!(value, json!({"event": "error", "data": {"error": "Room not found"}}));
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(ServerEvent::message_read("m1").kind().as_str(), "message_read");
        assert_eq!(EventKind::ReactionUpdated.to_string(), "reaction_updated");
    }
}
