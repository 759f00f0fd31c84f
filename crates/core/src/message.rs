//! Outbound message types for network communication.

use bytes::Bytes;
use framelock_messages::payload::{
    AdvanceFrame, ControlPayload, RepeaterReady, RolePublication, Welcome,
};
use framelock_messages::{MessageFlags, MessageHeader, MessageType};
use framelock_types::{FrameId, NodeId, NodeMask, NodeRole};

/// A message a node wants to publish.
///
/// The runner turns this into a [`MessageHeader`] and hands it to the
/// transport, which assigns origin and sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub message_type: MessageType,
    pub destinations: NodeMask,
    pub flags: MessageFlags,
    pub payload: Bytes,
}

impl OutboundMessage {
    // ═══════════════════════════════════════════════════════════════════════
    // Handshake Messages
    // ═══════════════════════════════════════════════════════════════════════

    /// Repeater looking for the emitter. Shouted to every possible node and
    /// not tracked, since nobody is registered yet.
    pub fn hello(role: NodeRole) -> Self {
        Self {
            message_type: MessageType::HelloEmitter,
            destinations: NodeMask::ALL,
            flags: MessageFlags::BROADCAST | MessageFlags::DOES_NOT_REQUIRE_ACK,
            payload: RolePublication { role }.encode(),
        }
    }

    /// Emitter accepting a repeater.
    pub fn welcome(to: NodeId, frame: FrameId) -> Self {
        Self {
            message_type: MessageType::WelcomeRepeater,
            destinations: to.mask(),
            flags: MessageFlags::empty(),
            payload: Welcome { frame }.encode(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Barrier Messages
    // ═══════════════════════════════════════════════════════════════════════

    /// Repeater ready to start `frame`.
    pub fn repeater_ready(emitter: NodeId, frame: FrameId) -> Self {
        Self {
            message_type: MessageType::RepeaterReady,
            destinations: emitter.mask(),
            flags: MessageFlags::empty(),
            payload: RepeaterReady { frame }.encode(),
        }
    }

    /// Emitter's go signal for `frame`, sent to every registered node.
    pub fn advance_frame(frame: FrameId, state: Bytes) -> Self {
        Self {
            message_type: MessageType::AdvanceFrame,
            destinations: NodeMask::EMPTY,
            flags: MessageFlags::BROADCAST,
            payload: AdvanceFrame { frame, state }.encode(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Session Messages
    // ═══════════════════════════════════════════════════════════════════════

    /// Cluster-wide shutdown. Addressed to every possible node so that
    /// nodes this one never registered hear it too, and looped back so the
    /// sender shuts down through the same path.
    pub fn shutdown_request() -> Self {
        Self {
            message_type: MessageType::GlobalShutdownRequest,
            destinations: NodeMask::ALL,
            flags: MessageFlags::BROADCAST | MessageFlags::LOOPBACK_TO_SENDER,
            payload: Bytes::new(),
        }
    }

    /// Application payload for every registered node.
    pub fn data(payload: Bytes) -> Self {
        Self {
            message_type: MessageType::Data,
            destinations: NodeMask::EMPTY,
            flags: MessageFlags::BROADCAST,
            payload,
        }
    }

    /// Header to hand to the transport.
    pub fn header(&self) -> MessageHeader {
        MessageHeader::new(self.message_type, self.destinations, self.flags)
    }

    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        self.message_type.name()
    }

    /// Check if this is a barrier message.
    pub fn is_barrier(&self) -> bool {
        matches!(
            self.message_type,
            MessageType::RepeaterReady | MessageType::AdvanceFrame
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_is_untracked_shout() {
        let hello = OutboundMessage::hello(NodeRole::Repeater);
        assert_eq!(hello.destinations, NodeMask::ALL);
        assert!(!hello.header().requires_ack());
    }

    #[test]
    fn test_barrier_messages_are_reliable() {
        let emitter = NodeId::new(0).unwrap();
        let ready = OutboundMessage::repeater_ready(emitter, FrameId(3));
        assert!(ready.is_barrier());
        assert!(ready.header().requires_ack());
        assert_eq!(ready.destinations, emitter.mask());

        let advance = OutboundMessage::advance_frame(FrameId(3), Bytes::new());
        assert!(advance.header().requires_ack());
        assert!(advance.flags.contains(MessageFlags::BROADCAST));
    }

    #[test]
    fn test_shutdown_loops_back() {
        let shutdown = OutboundMessage::shutdown_request();
        assert!(shutdown.flags.contains(MessageFlags::LOOPBACK_TO_SENDER));
        assert_eq!(shutdown.type_name(), "GlobalShutdownRequest");
    }
}
