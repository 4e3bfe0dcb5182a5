//! The event router.
//!
//! The router owns the connection registry, the room index and the reaction
//! engine. It handles connection lifecycle and every inbound event, works out
//! the audience of each outbound event and queues it on the audience's
//! outboxes. Delivery is at-most-once and best-effort.

use parley_protocol::{
    ChatMessage, ClientEvent, MembershipNotice, MessageTarget, ReactionRequest, SendMessage,
    ServerEvent, UserId,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::lock::KeyedLocks;
use crate::message::{now_millis, NewMessage};
use crate::reaction::ReactionEngine;
use crate::registry::{ConnectionId, ConnectionRegistry, DeliveryReport, Outbox, PresenceChange};
use crate::relay::{self, CallLeg};
use crate::room::{validate_room_id, RoomIndex};
use crate::store::{ChatStore, MessageStore, RoomStore, StoreError, UserDirectory};

/// Router errors. Each one is reported to the originating connection only.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Neither text nor a file was supplied.
    #[error("Message or file required")]
    EmptyMessage,

    /// Text exceeds the configured limit.
    #[error("Message text exceeds {0} bytes")]
    MessageTooLong(usize),

    /// Not exactly one of room / receiver was named.
    #[error("Exactly one of roomId or receiverId required")]
    InvalidTarget,

    /// Invalid room id.
    #[error("Invalid room id: {0}")]
    InvalidRoom(&'static str),

    /// Room does not exist in the store.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Message does not exist in the store.
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Emoji missing or too long.
    #[error("Invalid emoji")]
    InvalidEmoji,

    /// Maximum rooms per connection reached.
    #[error("Maximum rooms per connection reached")]
    RoomLimitReached,

    /// The connection is not registered.
    #[error("Connection not registered")]
    NotConnected,

    /// The store failed. Nothing was delivered.
    #[error("Persistence failed: {0}")]
    PersistenceFailed(#[from] StoreError),
}

impl RouterError {
    /// Short machine-readable name, used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::EmptyMessage => "empty_message",
            RouterError::MessageTooLong(_) => "message_too_long",
            RouterError::InvalidTarget => "invalid_target",
            RouterError::InvalidRoom(_) => "invalid_room",
            RouterError::RoomNotFound(_) => "room_not_found",
            RouterError::MessageNotFound(_) => "message_not_found",
            RouterError::InvalidEmoji => "invalid_emoji",
            RouterError::RoomLimitReached => "room_limit_reached",
            RouterError::NotConnected => "not_connected",
            RouterError::PersistenceFailed(_) => "persistence_failed",
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum rooms a single connection may be subscribed to.
    pub max_rooms_per_connection: usize,
    /// Maximum message text length in bytes.
    pub max_text_length: usize,
    /// Maximum emoji length in bytes.
    pub max_emoji_length: usize,
    /// Whether to drop cached rooms once nobody is subscribed.
    pub auto_delete_empty_rooms: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_rooms_per_connection: 100,
            max_text_length: 64 * 1024,
            max_emoji_length: 64,
            auto_delete_empty_rooms: true,
        }
    }
}

/// The central event router.
///
/// Presence transitions are serialized per user and membership changes per
/// room, from the state change through the store write to the broadcast.
pub struct Router {
    registry: ConnectionRegistry,
    rooms: RoomIndex,
    reactions: ReactionEngine,
    presence_locks: KeyedLocks,
    room_locks: KeyedLocks,
    store: Arc<dyn ChatStore>,
    config: RouterConfig,
}

impl Router {
    /// Create a router with default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self::with_config(store, RouterConfig::default())
    }

    /// Create a router with custom configuration.
    #[must_use]
    pub fn with_config(store: Arc<dyn ChatStore>, config: RouterConfig) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            registry: ConnectionRegistry::new(),
            rooms: RoomIndex::new(config.auto_delete_empty_rooms),
            reactions: ReactionEngine::new(),
            presence_locks: KeyedLocks::new(),
            room_locks: KeyedLocks::new(),
            store,
            config,
        }
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The room membership index.
    #[must_use]
    pub fn rooms(&self) -> &RoomIndex {
        &self.rooms
    }

    /// Router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            connection_count: self.registry.connection_count(),
            online_users: self.registry.online_count(),
            room_count: self.rooms.room_count(),
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Register an authenticated connection.
    ///
    /// On the user's first live connection, `user_online` goes to every
    /// registered connection including the new one. The new connection then
    /// receives `connection_success`.
    pub async fn connect(
        &self,
        user_id: &str,
        connection_id: ConnectionId,
        outbox: Outbox,
    ) -> DeliveryReport {
        let _presence = self.presence_locks.acquire(user_id).await;
        let mut report = DeliveryReport::default();
        let change = self.registry.register(user_id, connection_id.clone(), outbox);

        if change == PresenceChange::CameOnline {
            if let Err(e) = self.store.set_presence(user_id, true, now_millis()).await {
                warn!(user = %user_id, error = %e, "Failed to record online state");
            }

            let (username, avatar) = match self.store.profile(user_id).await {
                Ok(Some(profile)) => (Some(profile.username), profile.avatar),
                Ok(None) => (None, None),
                Err(e) => {
                    warn!(user = %user_id, error = %e, "Profile lookup failed");
                    (None, None)
                }
            };

            debug!(user = %user_id, "User online");
            let audience = self.registry.all_connections();
            report.absorb(
                self.registry
                    .deliver(&audience, ServerEvent::user_online(user_id, username, avatar)),
            );
        }

        report.absorb(self.registry.deliver(
            [&connection_id],
            ServerEvent::connection_success(user_id),
        ));
        report
    }

    /// Tear down a connection. Always completes.
    ///
    /// Room subscriptions are dropped without touching persisted membership.
    /// When the user's last connection goes, `user_offline` is sent to every
    /// remaining connection.
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> DeliveryReport {
        let Some(user_id) = self.registry.user_of(connection_id) else {
            return DeliveryReport::default();
        };
        let _presence = self.presence_locks.acquire(&user_id).await;

        let Some(departed) = self.registry.unregister(connection_id) else {
            return DeliveryReport::default();
        };

        self.rooms
            .drop_connection(connection_id, &departed.joined_rooms);

        if departed.change != PresenceChange::WentOffline {
            return DeliveryReport::default();
        }

        let last_seen = now_millis();
        if let Err(e) = self
            .store
            .set_presence(&departed.user_id, false, last_seen)
            .await
        {
            warn!(user = %departed.user_id, error = %e, "Failed to record offline state");
        }

        debug!(user = %departed.user_id, "User offline");
        let audience = self.registry.all_connections();
        self.registry
            .deliver(&audience, ServerEvent::user_offline(&departed.user_id, last_seen))
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    /// Handle an inbound event, reporting any error to its origin only.
    pub async fn dispatch(&self, origin: &ConnectionId, event: ClientEvent) -> DispatchOutcome {
        let kind = event.kind();
        match self.handle(origin, event).await {
            Ok(report) => DispatchOutcome {
                report,
                error: None,
            },
            Err(e) => {
                warn!(connection = %origin, event = %kind, error = %e, "Event rejected");
                let delivered = self
                    .registry
                    .send_to(origin, Arc::new(ServerEvent::error(e.to_string())));
                DispatchOutcome {
                    report: DeliveryReport {
                        delivered: usize::from(delivered),
                        skipped: usize::from(!delivered),
                    },
                    error: Some(e),
                }
            }
        }
    }

    /// Handle an inbound event.
    ///
    /// # Errors
    ///
    /// Returns the error that should be reported back to `origin`.
    pub async fn handle(
        &self,
        origin: &ConnectionId,
        event: ClientEvent,
    ) -> Result<DeliveryReport, RouterError> {
        let user_id = self
            .registry
            .user_of(origin)
            .ok_or(RouterError::NotConnected)?;

        match event {
            ClientEvent::JoinRoom(room_id) => self.join(&room_id, &user_id, origin).await,
            ClientEvent::LeaveRoom(room_id) => self.leave(&room_id, &user_id, origin).await,
            ClientEvent::SendMessage(payload) => self
                .route_new_message(&user_id, origin, payload)
                .await
                .map(|(_, report)| report),
            ClientEvent::Typing(typing) => {
                relay::signal_typing(&self.registry, &self.rooms, &user_id, origin, typing)
            }
            ClientEvent::MessageRead(message_id) => {
                self.route_read_receipt(&message_id, &user_id).await
            }
            ClientEvent::Reaction(request) => self
                .toggle_reaction(&user_id, origin, request)
                .await
                .map(|(_, report)| report),
            ClientEvent::CallUser(call) => Ok(relay::relay_call(
                &self.registry,
                &user_id,
                &call.receiver_id,
                CallLeg::Offer,
                call.signal_data,
            )),
            ClientEvent::AnswerCall(answer) => Ok(relay::relay_call(
                &self.registry,
                &user_id,
                &answer.to,
                CallLeg::Answer,
                answer.signal_data,
            )),
        }
    }

    /// Join a room and announce it to the room.
    ///
    /// # Errors
    ///
    /// Fails with [`RouterError::RoomNotFound`] for unknown rooms; the error
    /// goes to the joining connection only.
    pub async fn join(
        &self,
        room_id: &str,
        user_id: &str,
        connection_id: &ConnectionId,
    ) -> Result<DeliveryReport, RouterError> {
        validate_room_id(room_id).map_err(RouterError::InvalidRoom)?;

        let joined = self.registry.joined_rooms(connection_id);
        if !joined.contains(room_id) && joined.len() >= self.config.max_rooms_per_connection {
            return Err(RouterError::RoomLimitReached);
        }

        let _membership = self.room_locks.acquire(room_id).await;
        let room = self
            .store
            .add_member(room_id, user_id)
            .await?
            .ok_or_else(|| RouterError::RoomNotFound(room_id.to_string()))?;
        let members_count = room.members.len();

        self.rooms
            .subscribe(room_id, user_id, connection_id, room.members);
        self.registry.track_room(connection_id, room_id);

        debug!(room = %room_id, user = %user_id, members = members_count, "Joined room");

        let audience = self.rooms.broadcast_audience(room_id);
        Ok(self.registry.deliver(
            &audience,
            ServerEvent::UserJoinedRoom(MembershipNotice {
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
                members_count,
            }),
        ))
    }

    /// Leave a room.
    ///
    /// Only the user's last subscribed connection removes membership and
    /// announces `user_left_room` to the remaining subscribers.
    ///
    /// # Errors
    ///
    /// Fails with [`RouterError::RoomNotFound`] for unknown rooms.
    pub async fn leave(
        &self,
        room_id: &str,
        user_id: &str,
        connection_id: &ConnectionId,
    ) -> Result<DeliveryReport, RouterError> {
        validate_room_id(room_id).map_err(RouterError::InvalidRoom)?;

        let _membership = self.room_locks.acquire(room_id).await;
        let user_still_subscribed = self.rooms.unsubscribe(room_id, user_id, connection_id);
        self.registry.untrack_room(connection_id, room_id);

        if user_still_subscribed {
            debug!(room = %room_id, user = %user_id, "Left room on one connection");
            return Ok(DeliveryReport::default());
        }

        let room = self
            .store
            .remove_member(room_id, user_id)
            .await?
            .ok_or_else(|| RouterError::RoomNotFound(room_id.to_string()))?;
        let members_count = room.members.len();
        self.rooms.set_members(room_id, room.members);

        debug!(room = %room_id, user = %user_id, members = members_count, "Left room");

        let audience = self.rooms.broadcast_audience(room_id);
        Ok(self.registry.deliver(
            &audience,
            ServerEvent::UserLeftRoom(MembershipNotice {
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
                members_count,
            }),
        ))
    }

    /// Persist a new message, then deliver it.
    ///
    /// Room messages go to the room's audience. Direct messages go to the
    /// receiver's connections and are echoed to the sender's connections,
    /// whether or not the receiver is reachable.
    ///
    /// # Errors
    ///
    /// Validation and persistence errors; nothing is delivered on error.
    pub async fn route_new_message(
        &self,
        sender: &str,
        origin: &ConnectionId,
        payload: SendMessage,
    ) -> Result<(ChatMessage, DeliveryReport), RouterError> {
        let draft = NewMessage::from_payload(sender, payload, self.config.max_text_length)?;
        let message = self.store.create_message(draft).await?;

        debug!(
            message = %message.id,
            sender = %sender,
            target = ?message.target,
            "Message persisted"
        );

        let audience = self.message_audience(&message.target, sender, origin);
        let report = self
            .registry
            .deliver(&audience, ServerEvent::ReceiveMessage(message.clone()));
        Ok((message, report))
    }

    /// Mark a message read and notify.
    ///
    /// Room messages notify the room; direct messages notify only the
    /// original sender's connections.
    ///
    /// # Errors
    ///
    /// [`RouterError::MessageNotFound`] or [`RouterError::PersistenceFailed`].
    pub async fn route_read_receipt(
        &self,
        message_id: &str,
        reader_id: &str,
    ) -> Result<DeliveryReport, RouterError> {
        let message = self
            .store
            .mark_read(message_id)
            .await?
            .ok_or_else(|| RouterError::MessageNotFound(message_id.to_string()))?;

        debug!(message = %message_id, reader = %reader_id, "Message read");

        let audience = match &message.target {
            MessageTarget::Room(room_id) => self.rooms.broadcast_audience(room_id),
            MessageTarget::Direct(_) => self.registry.resolve_connections(&message.sender),
        };
        Ok(self
            .registry
            .deliver(&audience, ServerEvent::message_read(message_id)))
    }

    /// Toggle a reaction and deliver the updated message.
    ///
    /// # Errors
    ///
    /// [`RouterError::InvalidEmoji`], [`RouterError::MessageNotFound`] or
    /// [`RouterError::PersistenceFailed`]; nothing is delivered on error.
    pub async fn toggle_reaction(
        &self,
        user_id: &str,
        origin: &ConnectionId,
        request: ReactionRequest,
    ) -> Result<(ChatMessage, DeliveryReport), RouterError> {
        let emoji = request.emoji.trim();
        if emoji.is_empty() || emoji.len() > self.config.max_emoji_length {
            return Err(RouterError::InvalidEmoji);
        }

        let message = self
            .reactions
            .toggle(self.store.as_ref(), &request.message_id, user_id, emoji)
            .await?;

        let audience = self.message_audience(&message.target, user_id, origin);
        let report = self
            .registry
            .deliver(&audience, ServerEvent::ReactionUpdated(message.clone()));
        Ok((message, report))
    }

    /// Audience for message-shaped events.
    ///
    /// Room: every subscribed connection. Direct: the receiver's connections
    /// plus the acting user's own connections.
    fn message_audience(
        &self,
        target: &MessageTarget,
        actor: &str,
        origin: &ConnectionId,
    ) -> HashSet<ConnectionId> {
        match target {
            MessageTarget::Room(room_id) => self.rooms.broadcast_audience(room_id),
            MessageTarget::Direct(receiver) => {
                let mut audience = self.registry.resolve_connections(receiver);
                audience.extend(self.registry.resolve_connections(actor));
                audience.insert(origin.clone());
                audience
            }
        }
    }

    /// Resolve the user behind a connection.
    #[must_use]
    pub fn user_of(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.registry.user_of(connection_id)
    }
}

/// Result of [`Router::dispatch`].
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Deliveries made, including the error event if any.
    pub report: DeliveryReport,
    /// The error reported to the origin, if the event was rejected.
    pub error: Option<RouterError>,
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Number of users with at least one live connection.
    pub online_users: usize,
    /// Number of rooms with subscribers.
    pub room_count: usize,
}
