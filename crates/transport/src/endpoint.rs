//! Transport-independent reliable delivery core.

use crate::ack::{AckOutcome, AckTracker, DeliveryFailure};
use crate::clock::Clock;
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::stats::NetworkingStats;
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use framelock_messages::{
    decode, Message, MessageFlags, MessageHeader, MessageType, HEADER_SIZE, PROTOCOL_VERSION,
};
use framelock_types::{NodeId, NodeMask, SequenceId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// What happened to an inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// Could not be decoded; dropped.
    Malformed,
    /// Sent by this node, or not addressed to it; dropped.
    Ignored,
    /// An acknowledgment, applied to the pending set.
    Ack(AckOutcome),
    /// Queued for the node and acknowledged.
    Delivered,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    resends: AtomicU64,
    failed: AtomicU64,
    malformed: AtomicU64,
}

/// Reliable multicast endpoint of one node.
///
/// Owns the inbound and outbound queues and the pending-acknowledgment set.
/// Backends feed received datagrams to [`Endpoint::handle_datagram`], drain
/// [`Endpoint::try_next_outbound`] onto the wire and call
/// [`Endpoint::resend_due`] periodically. All methods take `&self` so one
/// endpoint can be shared by the receive, send and resend loops and the
/// foreground tick.
#[derive(Debug)]
pub struct Endpoint {
    local: NodeId,
    config: TransportConfig,
    clock: Arc<dyn Clock>,
    all_nodes: AtomicU64,
    next_sequence: AtomicU64,
    acks: Mutex<AckTracker>,
    inbound_tx: Sender<Message>,
    inbound_rx: Receiver<Message>,
    outbound_tx: Sender<Bytes>,
    outbound_rx: Receiver<Bytes>,
    failures_tx: Sender<DeliveryFailure>,
    failures_rx: Receiver<DeliveryFailure>,
    counters: Counters,
}

impl Endpoint {
    /// Create an endpoint. The session initially contains only `local`.
    pub fn new(local: NodeId, config: TransportConfig, clock: Arc<dyn Clock>) -> Self {
        let (inbound_tx, inbound_rx) = channel::unbounded();
        let (outbound_tx, outbound_rx) = channel::unbounded();
        let (failures_tx, failures_rx) = channel::unbounded();
        Self {
            local,
            config,
            clock,
            all_nodes: AtomicU64::new(local.mask().bits()),
            next_sequence: AtomicU64::new(0),
            acks: Mutex::new(AckTracker::new()),
            inbound_tx,
            inbound_rx,
            outbound_tx,
            outbound_rx,
            failures_tx,
            failures_rx,
            counters: Counters::default(),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The time source used for acknowledgment deadlines.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Every node currently in the session, including this one.
    pub fn all_nodes(&self) -> NodeMask {
        NodeMask::from_bits(self.all_nodes.load(Ordering::Acquire))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Membership
    // ═══════════════════════════════════════════════════════════════════════

    /// Add a node to the session. Returns the new `AllNodesMask`.
    pub fn register_node(&self, node: NodeId) -> NodeMask {
        let bits = self
            .all_nodes
            .fetch_or(node.mask().bits(), Ordering::AcqRel)
            | node.mask().bits();
        debug!(local = %self.local, node = %node, all_nodes = %NodeMask::from_bits(bits), "Registered node");
        NodeMask::from_bits(bits)
    }

    /// Remove a node from the session and stop waiting on its acks.
    /// The local node cannot be removed.
    pub fn unregister_node(&self, node: NodeId) -> NodeMask {
        if node == self.local {
            return self.all_nodes();
        }
        let bits = self
            .all_nodes
            .fetch_and(!node.mask().bits(), Ordering::AcqRel)
            & !node.mask().bits();
        let completed = self.acks.lock().forget_node(node);
        debug!(
            local = %self.local,
            node = %node,
            completed,
            all_nodes = %NodeMask::from_bits(bits),
            "Unregistered node"
        );
        NodeMask::from_bits(bits)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Send Path
    // ═══════════════════════════════════════════════════════════════════════

    /// Publish a message without blocking.
    ///
    /// Assigns origin and sequence id, resolves an empty broadcast
    /// destination to `AllNodesMask`, registers a pending acknowledgment for
    /// every destination except this node (unless the message is exempt),
    /// loops the message back when requested and queues it for sending.
    pub fn publish(
        &self,
        mut header: MessageHeader,
        payload: Bytes,
    ) -> Result<SequenceId, TransportError> {
        if header.destinations.is_empty() {
            if !header.flags.contains(MessageFlags::BROADCAST) {
                return Err(TransportError::NoDestination);
            }
            header.destinations = self.all_nodes();
        }
        if HEADER_SIZE + payload.len() > self.config.max_datagram_size {
            return Err(TransportError::PayloadTooLarge(payload.len()));
        }

        header.version = PROTOCOL_VERSION;
        header.origin = self.local;
        header.sequence = SequenceId(self.next_sequence.fetch_add(1, Ordering::AcqRel));
        if self.config.sent_from_editor {
            header.flags.insert(MessageFlags::SENT_FROM_EDITOR_PROCESS);
        }

        let message = Message::new(header, payload)?;
        let datagram = message.encode()?;

        if header.requires_ack() {
            let missing = header.destinations & self.all_nodes() & !self.local.mask();
            self.acks
                .lock()
                .register(message.clone(), missing, self.clock.now());
        }

        trace!(
            local = %self.local,
            message_type = %header.message_type,
            sequence = %header.sequence,
            destinations = %header.destinations,
            "Publishing message"
        );

        if header.flags.contains(MessageFlags::LOOPBACK_TO_SENDER) {
            let _ = self.inbound_tx.send(message);
        }
        self.enqueue(datagram);
        Ok(header.sequence)
    }

    fn enqueue(&self, datagram: Bytes) {
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        // The endpoint owns the receiver, so the channel never disconnects.
        let _ = self.outbound_tx.send(datagram);
    }

    /// Take the next datagram to put on the wire.
    pub fn try_next_outbound(&self) -> Option<Bytes> {
        self.outbound_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for a datagram to put on the wire.
    pub fn recv_outbound_timeout(&self, timeout: Duration) -> Option<Bytes> {
        match self.outbound_rx.recv_timeout(timeout) {
            Ok(datagram) => Some(datagram),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Resend overdue messages and give up on expired ones.
    /// Returns the number of resends queued.
    pub fn resend_due(&self) -> usize {
        let due = self.acks.lock().collect_due(
            self.clock.now(),
            self.config.accepted_ack_delay,
            self.config.communication_timeout,
        );

        for failure in due.failures {
            warn!(
                local = %self.local,
                message_type = %failure.message_type,
                sequence = %failure.sequence,
                destinations = %failure.missing,
                "Msg could not be delivered"
            );
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            let _ = self.failures_tx.send(failure);
        }

        let count = due.resends.len();
        for resend in due.resends {
            match resend.encode() {
                Ok(datagram) => {
                    debug!(
                        local = %self.local,
                        message_type = %resend.header.message_type,
                        sequence = %resend.header.sequence,
                        destinations = %resend.header.destinations,
                        "Resending message"
                    );
                    self.counters.resends.fetch_add(1, Ordering::Relaxed);
                    self.enqueue(datagram);
                }
                Err(e) => warn!(error = %e, "Failed to re-encode pending message"),
            }
        }
        count
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Receive Path
    // ═══════════════════════════════════════════════════════════════════════

    /// Process one datagram from the wire.
    ///
    /// Datagrams from this node or not addressed to it are ignored. Acks
    /// clear the sender's bit in the matching pending entry. Everything else
    /// is queued for the node and acknowledged back to its origin,
    /// including duplicates.
    pub fn handle_datagram(&self, datagram: &[u8]) -> DatagramOutcome {
        let message = match decode(datagram) {
            Ok(message) => message,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(local = %self.local, error = %e, len = datagram.len(), "Dropping malformed datagram");
                return DatagramOutcome::Malformed;
            }
        };
        let header = message.header;

        if header.origin == self.local || !header.destinations.contains(self.local) {
            return DatagramOutcome::Ignored;
        }

        if header.message_type == MessageType::AckMsgRx {
            let outcome = self.acks.lock().on_ack(header.sequence, header.origin);
            trace!(
                local = %self.local,
                from = %header.origin,
                sequence = %header.sequence,
                ?outcome,
                "Received ack"
            );
            return DatagramOutcome::Ack(outcome);
        }

        trace!(
            local = %self.local,
            origin = %header.origin,
            message_type = %header.message_type,
            sequence = %header.sequence,
            resending = header.flags.contains(MessageFlags::RESENDING),
            "Received message"
        );
        let _ = self.inbound_tx.send(message);

        match framelock_messages::encode(&header.ack_from(self.local), &[]) {
            Ok(ack) => self.enqueue(ack),
            Err(e) => warn!(error = %e, "Failed to encode ack"),
        }
        DatagramOutcome::Delivered
    }

    /// Non-blocking pop from the inbound queue.
    pub fn try_next_received(&self) -> Option<Message> {
        self.inbound_rx.try_recv().ok()
    }

    /// Drain messages the transport gave up on since the last call.
    pub fn take_delivery_failures(&self) -> Vec<DeliveryFailure> {
        self.failures_rx.try_iter().collect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn stats(&self) -> NetworkingStats {
        NetworkingStats {
            rx_queue_depth: self.inbound_rx.len(),
            tx_queue_depth: self.outbound_rx.len(),
            pending_ack_count: self.acks.lock().len(),
            permanent_failure_count: self.counters.failed.load(Ordering::Relaxed),
            total_resend_count: self.counters.resends.load(Ordering::Relaxed),
            total_sent_count: self.counters.sent.load(Ordering::Relaxed),
        }
    }

    pub fn is_tx_queue_empty(&self) -> bool {
        self.outbound_rx.is_empty()
    }

    pub fn has_pending_acks(&self) -> bool {
        !self.acks.lock().is_empty()
    }

    /// Every node still owing an acknowledgment for some message.
    pub fn pending_ack_destinations(&self) -> NodeMask {
        self.acks.lock().missing_union()
    }

    /// Number of datagrams dropped because they could not be decoded.
    pub fn malformed_count(&self) -> u64 {
        self.counters.malformed.load(Ordering::Relaxed)
    }

    /// Discard everything queued. Used when the transport stops.
    pub fn drain(&self) {
        while self.inbound_rx.try_recv().is_ok() {}
        while self.outbound_rx.try_recv().is_ok() {}
    }
}
