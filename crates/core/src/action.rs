//! Outputs of the node state machine.

use crate::OutboundMessage;
use framelock_messages::Message;
use framelock_types::NodeId;

/// Work the runner performs on behalf of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Publish a message on the transport.
    Publish(OutboundMessage),

    /// Add a node to the transport's `AllNodesMask`.
    RegisterNode(NodeId),

    /// Remove a node from the transport's `AllNodesMask` and stop waiting
    /// for its acknowledgments.
    UnregisterNode(NodeId),

    /// Hand an application payload to the host.
    DeliverAppData(Message),
}
