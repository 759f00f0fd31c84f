//! Unrecoverable node errors.

use framelock_messages::{MessageType, WireError};
use framelock_types::{FrameId, NodeId};
use std::time::Duration;
use thiserror::Error;

/// Why a node entered the terminal `FatalError` state.
///
/// Returned from [`crate::ClusterDriver::do_frame`]; the host is expected to
/// stop ticking and exit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("Transport failed to start: {0}")]
    TransportStart(String),

    #[error("Unexpected {message_type} from {origin} while {state}")]
    UnexpectedMessage {
        message_type: MessageType,
        origin: NodeId,
        state: &'static str,
    },

    #[error("Malformed {message_type} from {origin}: {reason}")]
    MalformedPayload {
        message_type: MessageType,
        origin: NodeId,
        reason: String,
    },

    #[error("Frame mismatch from {origin}: at {expected}, got {received}")]
    FrameMismatch {
        origin: NodeId,
        expected: FrameId,
        received: FrameId,
    },

    #[error("No emitter answered within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("No repeaters found within {0:?}")]
    NoRepeaters(Duration),

    #[error("Emitter silent for {waited:?} while awaiting {frame}")]
    EmitterSilent { frame: FrameId, waited: Duration },

    #[error("Node role is unassigned")]
    UnassignedRole,
}

impl FatalError {
    pub(crate) fn malformed(message_type: MessageType, origin: NodeId, err: WireError) -> Self {
        FatalError::MalformedPayload {
            message_type,
            origin,
            reason: err.to_string(),
        }
    }
}
