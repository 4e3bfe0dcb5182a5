//! # parley-protocol
//!
//! Wire events for the Parley chat router.
//!
//! This crate defines the closed set of events exchanged between
//! authenticated clients and the router, and the codecs used to carry them.
//!
//! ## Events
//!
//! - Inbound ([`ClientEvent`]): `join_room`, `leave_room`, `send_message`,
//!   `typing`, `message_read`, `reaction`, `call_user`, `answer_call`
//! - Outbound ([`ServerEvent`]): presence, membership, message delivery,
//!   typing, read receipts, reaction updates, call signaling and errors
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, ClientEvent};
//!
//! let event: ClientEvent =
//!     codec::decode_json(r#"{"event":"join_room","data":"general"}"#).unwrap();
//! assert_eq!(event, ClientEvent::JoinRoom("general".into()));
//!
//! let bytes = codec::encode(&event).unwrap();
//! let decoded: ClientEvent = codec::decode(&bytes).unwrap();
//! assert_eq!(decoded, event);
//! ```

pub mod codec;
pub mod events;

pub use codec::{ProtocolError, WireFormat};
pub use events::{
    CallAnswer, CallRequest, CallSignal, ChatMessage, ClientEvent, ConnectionSuccess, ErrorNotice,
    EventKind, FileDescriptor, MembershipNotice, MessageId, MessageTarget, PresenceNotice,
    Reaction, ReactionRequest, ReadReceipt, RoomId, SendMessage, ServerEvent, Typing,
    TypingNotice, UserId,
};
