//! Inputs to the node state machine.

use framelock_messages::{Message, MessageType};
use framelock_types::{NodeMask, SequenceId};

/// Everything that can happen to a node.
#[derive(Debug, Clone)]
pub enum Event {
    /// One iteration of the host loop. `new_frame` is true on the first
    /// iteration of each host frame.
    Tick { new_frame: bool },

    /// A message was taken off the transport's inbound queue.
    MessageReceived(Message),

    /// The transport gave up on a message after the communication timeout.
    DeliveryFailed {
        message_type: MessageType,
        sequence: SequenceId,
        missing: NodeMask,
    },

    /// The host finished rendering the current frame.
    FrameEnded,

    /// Ask every node in the cluster to shut down.
    ClusterShutdownRequested,

    /// Shut down this node only.
    LocalShutdownRequested,
}

impl Event {
    /// Get a human-readable name for this event.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::Tick { .. } => "Tick",
            Event::MessageReceived(_) => "MessageReceived",
            Event::DeliveryFailed { .. } => "DeliveryFailed",
            Event::FrameEnded => "FrameEnded",
            Event::ClusterShutdownRequested => "ClusterShutdownRequested",
            Event::LocalShutdownRequested => "LocalShutdownRequested",
        }
    }
}
