//! Encoding and decoding of datagrams.
//!
//! The header is written and read directly over the byte buffer; there is no
//! intermediate representation between the socket and [`MessageHeader`].

use crate::header::{MessageFlags, MessageHeader, MessageType, HEADER_SIZE, PROTOCOL_VERSION};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use framelock_types::{NodeId, NodeMask, SequenceId};
use thiserror::Error;

/// Largest payload the `payload_size` field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Errors that can occur while encoding or decoding a datagram.
///
/// Every decode variant means the datagram is malformed and must be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("Message too short: {len} bytes, header needs {}", HEADER_SIZE)]
    Truncated { len: usize },

    #[error("Payload of {size} bytes at offset {offset} does not fit in {len} bytes")]
    PayloadOutOfBounds { offset: usize, size: usize, len: usize },

    #[error("Protocol version mismatch: expected {expected}, got {received}")]
    VersionMismatch { expected: u16, received: u16 },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u16),

    #[error("Invalid origin node id: {0}")]
    InvalidOrigin(u8),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid {message_type} payload: {reason}")]
    InvalidPayload {
        message_type: MessageType,
        reason: &'static str,
    },
}

/// A decoded header together with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Bytes,
}

impl Message {
    /// Pair a header with its payload, fixing up the size and offset fields.
    pub fn new(mut header: MessageHeader, payload: Bytes) -> Result<Self, WireError> {
        header.payload_size =
            u16::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge(payload.len()))?;
        header.offset_to_payload = HEADER_SIZE as u16;
        Ok(Self { header, payload })
    }

    /// Encode to a datagram.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        encode(&self.header, &self.payload)
    }
}

/// Encode a header and payload into a datagram.
///
/// `payload_size` and `offset_to_payload` are derived from `payload` and the
/// values in `header` are ignored. The payload always starts right after the
/// header, so a decoded message with padding re-encodes without it.
pub fn encode(header: &MessageHeader, payload: &[u8]) -> Result<Bytes, WireError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u16_le(header.version);
    buf.put_u8(header.origin.get());
    buf.put_u64_le(header.sequence.0);
    buf.put_u16_le(header.message_type as u16);
    buf.put_u16_le(header.flags.bits());
    buf.put_u64_le(header.destinations.bits());
    buf.put_u16_le(payload.len() as u16);
    buf.put_u16_le(HEADER_SIZE as u16);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decode a datagram.
///
/// Unknown flag bits are dropped. The payload is copied out so the receive
/// buffer can be reused.
pub fn decode(datagram: &[u8]) -> Result<Message, WireError> {
    if datagram.len() < HEADER_SIZE {
        return Err(WireError::Truncated {
            len: datagram.len(),
        });
    }

    let mut buf = datagram;
    let version = buf.get_u16_le();
    if version != PROTOCOL_VERSION {
        return Err(WireError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            received: version,
        });
    }

    let raw_origin = buf.get_u8();
    let origin = NodeId::new(raw_origin).ok_or(WireError::InvalidOrigin(raw_origin))?;
    let sequence = SequenceId(buf.get_u64_le());
    let raw_type = buf.get_u16_le();
    let message_type =
        MessageType::from_u16(raw_type).ok_or(WireError::UnknownMessageType(raw_type))?;
    let flags = MessageFlags::from_bits_truncate(buf.get_u16_le());
    let destinations = NodeMask::from_bits(buf.get_u64_le());
    let payload_size = buf.get_u16_le();
    let offset_to_payload = buf.get_u16_le();

    let offset = offset_to_payload as usize;
    let size = payload_size as usize;
    if offset < HEADER_SIZE || offset + size > datagram.len() {
        return Err(WireError::PayloadOutOfBounds {
            offset,
            size,
            len: datagram.len(),
        });
    }

    Ok(Message {
        header: MessageHeader {
            version,
            origin,
            sequence,
            message_type,
            flags,
            destinations,
            payload_size,
            offset_to_payload,
        },
        payload: Bytes::copy_from_slice(&datagram[offset..offset + size]),
    })
}
