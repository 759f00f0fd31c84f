//! Transport errors.

use framelock_messages::WireError;
use std::io;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors returned by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to configure socket: {0}")]
    Socket(#[source] io::Error),

    #[error("Failed to bind UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Failed to join multicast group {group}: {source}")]
    JoinGroup {
        group: Ipv4Addr,
        #[source]
        source: io::Error,
    },

    #[error("Network adapter not found: {0}")]
    AdapterNotFound(String),

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Message has no destination and is not a broadcast")]
    NoDestination,

    #[error("Payload of {0} bytes exceeds the datagram limit")]
    PayloadTooLarge(usize),

    #[error("Wire encoding failed: {0}")]
    Wire(#[from] WireError),

    #[error("Transport stopped")]
    Stopped,
}

impl TransportError {
    /// Whether this error means the transport never came up.
    pub fn is_start_error(&self) -> bool {
        matches!(
            self,
            TransportError::Socket(_)
                | TransportError::Bind { .. }
                | TransportError::JoinGroup { .. }
                | TransportError::AdapterNotFound(_)
                | TransportError::Spawn { .. }
        )
    }
}
