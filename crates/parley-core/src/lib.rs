//! # parley-core
//!
//! Real-time event routing for the Parley chat server.
//!
//! This crate provides the building blocks behind every live connection:
//!
//! - **Registry** - Live connections per user, derived online/offline state
//! - **Room** - Room membership mirror and broadcast subscriptions
//! - **Router** - Unicast vs room delivery of messages, receipts and reactions
//! - **Relay** - Stateless typing indicators and call signaling
//! - **Reaction** - Per-message serialized reaction toggling
//! - **Store** - Persistence collaborator traits and an in-memory store
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Router    │────▶│    Store    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │            ┌──────┴──────┐
//!        │            ▼             ▼
//!        │     ┌─────────────┐ ┌─────────────┐
//!        └─────│  Registry   │ │  RoomIndex  │
//!     outbox   └─────────────┘ └─────────────┘
//! ```

mod lock;
pub mod message;
pub mod reaction;
pub mod registry;
pub mod relay;
pub mod room;
pub mod router;
pub mod store;

pub use message::NewMessage;
pub use reaction::{toggle_reaction, ReactionEngine, Toggle};
pub use registry::{
    outbox, ConnectionId, ConnectionRegistry, DeliveryReport, Inbox, Outbox, PresenceChange,
};
pub use room::RoomIndex;
pub use router::{DispatchOutcome, Router, RouterConfig, RouterError, RouterStats};
pub use store::{
    ChatStore, MemoryStore, MessageStore, RoomSnapshot, RoomStore, StoreError, UserDirectory,
    UserProfile,
};
