//! Control payloads carried by handshake and barrier messages.

use crate::{MessageType, WireError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use framelock_types::{FrameId, NodeRole};

/// A payload with a fixed message type.
pub trait ControlPayload: Sized {
    /// Message type this payload travels under.
    const MESSAGE_TYPE: MessageType;

    /// Encode to payload bytes.
    fn encode(&self) -> Bytes;

    /// Decode from payload bytes.
    fn decode(payload: &[u8]) -> Result<Self, WireError>;
}

fn invalid(message_type: MessageType, reason: &'static str) -> WireError {
    WireError::InvalidPayload {
        message_type,
        reason,
    }
}

fn read_frame(mut payload: &[u8], message_type: MessageType) -> Result<FrameId, WireError> {
    if payload.len() < 8 {
        return Err(invalid(message_type, "missing frame id"));
    }
    Ok(FrameId(payload.get_u64_le()))
}

/// Role announcement sent with `HelloEmitter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePublication {
    pub role: NodeRole,
}

impl ControlPayload for RolePublication {
    const MESSAGE_TYPE: MessageType = MessageType::HelloEmitter;

    fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&[self.role.as_u8()])
    }

    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let raw = *payload
            .first()
            .ok_or_else(|| invalid(Self::MESSAGE_TYPE, "missing role"))?;
        let role = NodeRole::from_u8(raw).ok_or_else(|| invalid(Self::MESSAGE_TYPE, "unknown role"))?;
        Ok(Self { role })
    }
}

/// Emitter's answer to a hello, carrying the frame the session is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Welcome {
    pub frame: FrameId,
}

impl ControlPayload for Welcome {
    const MESSAGE_TYPE: MessageType = MessageType::WelcomeRepeater;

    fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.frame.0.to_le_bytes())
    }

    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            frame: read_frame(payload, Self::MESSAGE_TYPE)?,
        })
    }
}

/// A repeater is ready to start `frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeaterReady {
    pub frame: FrameId,
}

impl ControlPayload for RepeaterReady {
    const MESSAGE_TYPE: MessageType = MessageType::RepeaterReady;

    fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.frame.0.to_le_bytes())
    }

    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            frame: read_frame(payload, Self::MESSAGE_TYPE)?,
        })
    }
}

/// The emitter's go signal for `frame`, with an optional opaque state blob
/// every node applies before rendering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceFrame {
    pub frame: FrameId,
    pub state: Bytes,
}

impl ControlPayload for AdvanceFrame {
    const MESSAGE_TYPE: MessageType = MessageType::AdvanceFrame;

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + self.state.len());
        buf.put_u64_le(self.frame.0);
        buf.put_slice(&self.state);
        buf.freeze()
    }

    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let frame = read_frame(payload, Self::MESSAGE_TYPE)?;
        Ok(Self {
            frame,
            state: Bytes::copy_from_slice(&payload[8..]),
        })
    }
}
