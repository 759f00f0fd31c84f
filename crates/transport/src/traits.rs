//! Transport trait implemented by the UDP and in-memory backends.

use crate::ack::DeliveryFailure;
use crate::clock::Clock;
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::stats::NetworkingStats;
use bytes::Bytes;
use framelock_messages::{Message, MessageHeader};
use framelock_types::{NodeId, NodeMask, SequenceId};
use std::sync::Arc;

/// A started reliable multicast transport.
///
/// Backends own an [`Endpoint`] and whatever moves its datagrams; the
/// protocol operations are provided on top of it. Sends never block.
pub trait Transport: Send {
    /// The reliable core this backend drives.
    fn endpoint(&self) -> &Endpoint;

    /// Cancel background work, release the socket and drain queues.
    /// Calling it again has no effect.
    fn stop(&mut self);

    /// Whether [`Transport::stop`] has been called.
    fn is_stopped(&self) -> bool;

    fn clock(&self) -> Arc<dyn Clock> {
        self.endpoint().clock().clone()
    }

    fn local_id(&self) -> NodeId {
        self.endpoint().local_id()
    }

    fn all_nodes(&self) -> NodeMask {
        self.endpoint().all_nodes()
    }

    fn register_node(&self, node: NodeId) -> NodeMask {
        self.endpoint().register_node(node)
    }

    fn unregister_node(&self, node: NodeId) -> NodeMask {
        self.endpoint().unregister_node(node)
    }

    fn publish(&self, header: MessageHeader, payload: Bytes) -> Result<SequenceId, TransportError> {
        if self.is_stopped() {
            return Err(TransportError::Stopped);
        }
        self.endpoint().publish(header, payload)
    }

    fn try_next_received(&self) -> Option<Message> {
        self.endpoint().try_next_received()
    }

    fn take_delivery_failures(&self) -> Vec<DeliveryFailure> {
        self.endpoint().take_delivery_failures()
    }

    fn stats(&self) -> NetworkingStats {
        self.endpoint().stats()
    }

    fn is_tx_queue_empty(&self) -> bool {
        self.endpoint().is_tx_queue_empty()
    }

    fn has_pending_acks(&self) -> bool {
        self.endpoint().has_pending_acks()
    }
}
