//! Stateless relays: typing indicators and call signaling.
//!
//! Nothing here is stored. Clearing a stale "is typing" indicator is the
//! client's job.

use parley_protocol::{CallSignal, MessageTarget, ServerEvent, Typing};
use std::collections::HashSet;
use tracing::trace;

use crate::message::resolve_target;
use crate::registry::{ConnectionId, ConnectionRegistry, DeliveryReport};
use crate::room::RoomIndex;
use crate::router::RouterError;

/// Connections that should see a typing signal.
///
/// Room typing goes to every subscribed connection except the one typing.
/// Direct typing goes to the receiver's connections only.
#[must_use]
pub fn typing_audience(
    registry: &ConnectionRegistry,
    rooms: &RoomIndex,
    origin: &ConnectionId,
    target: &MessageTarget,
) -> HashSet<ConnectionId> {
    match target {
        MessageTarget::Room(room_id) => {
            let mut audience = rooms.broadcast_audience(room_id);
            audience.remove(origin);
            audience
        }
        MessageTarget::Direct(receiver) => registry.resolve_connections(receiver),
    }
}

/// Forward a typing signal from `sender`.
///
/// # Errors
///
/// Returns [`RouterError::InvalidTarget`] unless exactly one of room or
/// receiver is named.
pub fn signal_typing(
    registry: &ConnectionRegistry,
    rooms: &RoomIndex,
    sender: &str,
    origin: &ConnectionId,
    typing: Typing,
) -> Result<DeliveryReport, RouterError> {
    let target = resolve_target(typing.room_id, typing.receiver_id)?;
    let audience = typing_audience(registry, rooms, origin, &target);

    trace!(user = %sender, is_typing = typing.is_typing, audience = audience.len(), "Typing");
    Ok(registry.deliver(&audience, ServerEvent::user_typing(sender, typing.is_typing)))
}

/// Call signaling events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLeg {
    /// `call_user` becomes `incoming_call`.
    Offer,
    /// `answer_call` becomes `call_answered`.
    Answer,
}

/// Relay opaque call signaling data to every connection of `to`.
pub fn relay_call(
    registry: &ConnectionRegistry,
    from: &str,
    to: &str,
    leg: CallLeg,
    signal_data: serde_json::Value,
) -> DeliveryReport {
    let signal = CallSignal {
        from: from.to_string(),
        signal_data,
    };
    let event = match leg {
        CallLeg::Offer => ServerEvent::IncomingCall(signal),
        CallLeg::Answer => ServerEvent::CallAnswered(signal),
    };

    let audience = registry.resolve_connections(to);
    trace!(from = %from, to = %to, ?leg, audience = audience.len(), "Call signal");
    registry.deliver(&audience, event)
}
