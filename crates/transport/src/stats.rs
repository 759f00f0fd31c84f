//! Transport statistics.

use std::fmt;

/// Point-in-time snapshot of transport activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkingStats {
    /// Messages waiting in the inbound queue.
    pub rx_queue_depth: usize,
    /// Datagrams waiting to be sent.
    pub tx_queue_depth: usize,
    /// Messages still waiting on at least one acknowledgment.
    pub pending_ack_count: usize,
    /// Messages given up on after the communication timeout.
    pub permanent_failure_count: u64,
    /// Retransmissions.
    pub total_resend_count: u64,
    /// Datagrams queued for sending, including acks and resends.
    pub total_sent_count: u64,
}

impl fmt::Display for NetworkingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx={} tx={} pending_acks={} failed={} resends={} sent={}",
            self.rx_queue_depth,
            self.tx_queue_depth,
            self.pending_ack_count,
            self.permanent_failure_count,
            self.total_resend_count,
            self.total_sent_count
        )
    }
}
