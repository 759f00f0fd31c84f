//! Message header fields.

use bitflags::bitflags;
use framelock_types::{NodeId, NodeMask, SequenceId};
use std::fmt;

/// Current protocol version. Peers with a different version are rejected.
pub const PROTOCOL_VERSION: u16 = 1;

/// Encoded size of [`MessageHeader`] in bytes.
pub const HEADER_SIZE: usize = 2 + 1 + 8 + 2 + 2 + 8 + 2 + 2;

/// Message type carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// Transport-level acknowledgment. Never itself acknowledged.
    AckMsgRx = 1,
    /// Repeater announcing itself during the handshake.
    HelloEmitter = 2,
    /// Emitter accepting a repeater into the session.
    WelcomeRepeater = 3,
    /// Emitter's go signal for a frame.
    AdvanceFrame = 4,
    /// Repeater ready to start a frame.
    RepeaterReady = 5,
    /// Request for every node to shut down.
    GlobalShutdownRequest = 6,
    /// Opaque application payload.
    Data = 7,
}

impl MessageType {
    /// Parse the wire value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(MessageType::AckMsgRx),
            2 => Some(MessageType::HelloEmitter),
            3 => Some(MessageType::WelcomeRepeater),
            4 => Some(MessageType::AdvanceFrame),
            5 => Some(MessageType::RepeaterReady),
            6 => Some(MessageType::GlobalShutdownRequest),
            7 => Some(MessageType::Data),
            _ => None,
        }
    }

    /// Get a human-readable name for this message type.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::AckMsgRx => "AckMsgRx",
            MessageType::HelloEmitter => "HelloEmitter",
            MessageType::WelcomeRepeater => "WelcomeRepeater",
            MessageType::AdvanceFrame => "AdvanceFrame",
            MessageType::RepeaterReady => "RepeaterReady",
            MessageType::GlobalShutdownRequest => "GlobalShutdownRequest",
            MessageType::Data => "Data",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Per-message delivery flags.
    #[derive(Default)]
    pub struct MessageFlags: u16 {
        /// An empty destination set means every node in the session.
        const BROADCAST = 1;
        /// Also deliver to the sender's own inbound queue.
        const LOOPBACK_TO_SENDER = 2;
        /// Do not track acknowledgments for this message.
        const DOES_NOT_REQUIRE_ACK = 4;
        /// Retransmission narrowed to the nodes that have not acked yet.
        const RESENDING = 8;
        /// Sent by an editor-hosted process rather than a cluster build.
        const SENT_FROM_EDITOR_PROCESS = 16;
    }
}

/// Fixed-layout message header.
///
/// Built by the sender immediately before publishing. The transport fills in
/// `version`, `origin` and `sequence`, and resolves broadcast destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u16,
    pub origin: NodeId,
    pub sequence: SequenceId,
    pub message_type: MessageType,
    pub flags: MessageFlags,
    pub destinations: NodeMask,
    pub payload_size: u16,
    pub offset_to_payload: u16,
}

impl MessageHeader {
    /// Header for a new outbound message. Origin and sequence are assigned
    /// by the transport at publish time.
    pub fn new(message_type: MessageType, destinations: NodeMask, flags: MessageFlags) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            origin: NodeId::ZERO,
            sequence: SequenceId::default(),
            message_type,
            flags,
            destinations,
            payload_size: 0,
            offset_to_payload: HEADER_SIZE as u16,
        }
    }

    /// Whether the sender tracks acknowledgments for this message.
    pub fn requires_ack(&self) -> bool {
        self.message_type != MessageType::AckMsgRx
            && !self.flags.contains(MessageFlags::DOES_NOT_REQUIRE_ACK)
    }

    /// Acknowledgment of this message, sent by `local` back to the origin.
    pub fn ack_from(&self, local: NodeId) -> MessageHeader {
        MessageHeader {
            version: PROTOCOL_VERSION,
            origin: local,
            sequence: self.sequence,
            message_type: MessageType::AckMsgRx,
            flags: MessageFlags::DOES_NOT_REQUIRE_ACK,
            destinations: self.origin.mask(),
            payload_size: 0,
            offset_to_payload: HEADER_SIZE as u16,
        }
    }
}
