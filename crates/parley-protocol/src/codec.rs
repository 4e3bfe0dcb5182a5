//! Codecs for encoding and decoding Parley events.
//!
//! Two wire formats are supported:
//! - **JSON** for WebSocket text frames, one event per frame.
//! - **MessagePack** for binary frames, with length-prefixed framing so that
//!   several events may share a buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Wire format negotiated for a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// JSON text frames.
    #[default]
    Json,
    /// Length-prefixed MessagePack binary frames.
    MessagePack,
}

impl WireFormat {
    /// Parse a format name as given in the handshake query.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(WireFormat::Json),
            "msgpack" | "messagepack" => Some(WireFormat::MessagePack),
            _ => None,
        }
    }
}

/// Encode an event as a JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_json<T: Serialize>(event: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode an event from a JSON string.
///
/// # Errors
///
/// Returns an error if the text is not a valid event.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode an event to length-prefixed MessagePack.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded event
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode<T: Serialize>(event: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(event, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode an event into an existing buffer.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode_into<T: Serialize>(event: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(event)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single length-prefixed event.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode an event from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(event))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    Ok(Some(rmp_serde::from_slice(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClientEvent, ReactionRequest, ServerEvent};

    #[test]
    fn test_json_matches_socket_shape() {
        let text = encode_json(&ServerEvent::connection_success("alice")).unwrap();
        assert_eq!(
            text,
            r#"{"event":"connection_success","data":{"userId":"alice"}}"#
        );

        let event: ClientEvent = decode_json(r#"{"event":"leave_room","data":"general"}"#).unwrap();
        assert_eq!(event, ClientEvent::LeaveRoom("general".into()));
    }

    #[test]
    fn test_json_rejects_garbage() {
        assert!(matches!(
            decode_json::<ClientEvent>("not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&ClientEvent::JoinRoom("general".into())).unwrap();

        match decode::<ClientEvent>(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        buf.extend_from_slice(&[0u8; 8]);

        match decode_from::<ClientEvent>(&mut buf) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let first = ClientEvent::JoinRoom("general".into());
        let second = ClientEvent::Reaction(ReactionRequest {
            message_id: "m1".into(),
            emoji: "🎉".into(),
        });

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).unwrap();
        encode_into(&second, &mut buf).unwrap();

        // A trailing partial frame must wait for more data.
        let partial = encode(&first).unwrap();
        buf.extend_from_slice(&partial[..3]);

        assert_eq!(decode_from::<ClientEvent>(&mut buf).unwrap(), Some(first));
        assert_eq!(decode_from::<ClientEvent>(&mut buf).unwrap(), Some(second));
        assert_eq!(decode_from::<ClientEvent>(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_wire_format_names() {
        assert_eq!(WireFormat::from_name("json"), Some(WireFormat::Json));
        assert_eq!(WireFormat::from_name("MsgPack"), Some(WireFormat::MessagePack));
        assert_eq!(WireFormat::from_name("xml"), None);
        assert_eq!(WireFormat::default(), WireFormat::Json);
    }
}
