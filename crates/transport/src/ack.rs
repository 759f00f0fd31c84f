//! Outbound acknowledgment bookkeeping.

use framelock_messages::{Message, MessageFlags, MessageType};
use framelock_types::{NodeId, NodeMask, SequenceId};
use std::collections::BTreeMap;
use std::time::Duration;

/// A message some destinations have not acknowledged yet.
#[derive(Debug, Clone)]
pub struct PendingAck {
    /// The message as first published.
    pub message: Message,
    /// Destinations that still owe an acknowledgment.
    pub missing: NodeMask,
    /// When the message was first sent. Never refreshed by resends.
    pub first_sent: Duration,
    /// When the message was last (re)sent.
    pub last_sent: Duration,
}

/// A message the transport gave up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub message_type: MessageType,
    pub sequence: SequenceId,
    /// Destinations that never acknowledged.
    pub missing: NodeMask,
    /// Time between the first send and giving up.
    pub age: Duration,
}

/// Result of applying an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// No pending message with this sequence id, or the node was not missing.
    Unknown,
    /// The node's bit was cleared; others are still missing.
    Partial { remaining: NodeMask },
    /// The last missing node acknowledged; the entry was removed.
    Complete,
}

/// Work found by a resend scan.
#[derive(Debug, Default)]
pub struct DueMessages {
    /// Messages to send again, already narrowed to the missing nodes and
    /// flagged as resends.
    pub resends: Vec<Message>,
    /// Messages dropped from tracking.
    pub failures: Vec<DeliveryFailure>,
}

/// Pending acknowledgments of this node's own messages, keyed by sequence id.
///
/// Not synchronized itself; [`crate::Endpoint`] keeps it behind a single mutex
/// shared by the receive and resend loops.
#[derive(Debug, Default)]
pub struct AckTracker {
    pending: BTreeMap<SequenceId, PendingAck>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a message. Nothing is tracked if `missing` is empty.
    pub fn register(&mut self, message: Message, missing: NodeMask, now: Duration) {
        if missing.is_empty() {
            return;
        }
        self.pending.insert(
            message.header.sequence,
            PendingAck {
                message,
                missing,
                first_sent: now,
                last_sent: now,
            },
        );
    }

    /// Apply an acknowledgment from `from` for `sequence`.
    pub fn on_ack(&mut self, sequence: SequenceId, from: NodeId) -> AckOutcome {
        let Some(entry) = self.pending.get_mut(&sequence) else {
            return AckOutcome::Unknown;
        };
        if !entry.missing.contains(from) {
            return AckOutcome::Unknown;
        }
        entry.missing.clear(from);
        if entry.missing.is_empty() {
            self.pending.remove(&sequence);
            AckOutcome::Complete
        } else {
            AckOutcome::Partial {
                remaining: entry.missing,
            }
        }
    }

    /// Stop waiting on a node that left the session. Returns how many
    /// entries this completed.
    pub fn forget_node(&mut self, node: NodeId) -> usize {
        let before = self.pending.len();
        for entry in self.pending.values_mut() {
            entry.missing.clear(node);
        }
        self.pending.retain(|_, entry| !entry.missing.is_empty());
        before - self.pending.len()
    }

    /// Scan for messages to resend or give up on.
    ///
    /// An entry older than `communication_timeout` fails. Otherwise, an
    /// entry not sent for `accepted_ack_delay` is resent to its missing
    /// nodes and its `last_sent` refreshed.
    pub fn collect_due(
        &mut self,
        now: Duration,
        accepted_ack_delay: Duration,
        communication_timeout: Duration,
    ) -> DueMessages {
        let mut due = DueMessages::default();

        self.pending.retain(|sequence, entry| {
            let age = now.saturating_sub(entry.first_sent);
            if age >= communication_timeout {
                due.failures.push(DeliveryFailure {
                    message_type: entry.message.header.message_type,
                    sequence: *sequence,
                    missing: entry.missing,
                    age,
                });
                return false;
            }

            if now.saturating_sub(entry.last_sent) >= accepted_ack_delay {
                entry.last_sent = now;
                let mut resend = entry.message.clone();
                resend.header.destinations = entry.missing;
                resend.header.flags.insert(MessageFlags::RESENDING);
                due.resends.push(resend);
            }
            true
        });

        due
    }

    /// Number of tracked messages.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Union of every node still owing an acknowledgment.
    pub fn missing_union(&self) -> NodeMask {
        self.pending
            .values()
            .fold(NodeMask::EMPTY, |acc, entry| acc | entry.missing)
    }

    /// Look up a tracked message.
    pub fn get(&self, sequence: SequenceId) -> Option<&PendingAck> {
        self.pending.get(&sequence)
    }
}
