//! Transport configuration.

use std::net::Ipv4Addr;
use std::time::Duration;

/// Reliability settings shared by every transport backend.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long a destination may take to acknowledge before the message
    /// is resent to it.
    pub accepted_ack_delay: Duration,
    /// Total time after the first send before a message is given up on.
    pub communication_timeout: Duration,
    /// How often the resend loop scans pending acknowledgments.
    pub resend_interval: Duration,
    /// Largest datagram the transport will send.
    pub max_datagram_size: usize,
    /// Mark every outgoing header as sent from an editor process.
    pub sent_from_editor: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            accepted_ack_delay: Duration::from_secs(1),
            communication_timeout: Duration::from_secs(5),
            resend_interval: Duration::from_millis(5),
            // IPv4 UDP payload limit
            max_datagram_size: 65_507,
            sent_from_editor: false,
        }
    }
}

impl TransportConfig {
    pub fn with_accepted_ack_delay(mut self, delay: Duration) -> Self {
        self.accepted_ack_delay = delay;
        self
    }

    pub fn with_communication_timeout(mut self, timeout: Duration) -> Self {
        self.communication_timeout = timeout;
        self
    }

    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }

    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    pub fn with_sent_from_editor(mut self, enabled: bool) -> Self {
        self.sent_from_editor = enabled;
        self
    }
}

/// Socket settings for [`crate::UdpTransport`].
#[derive(Debug, Clone)]
pub struct MulticastConfig {
    /// Multicast group every node joins.
    pub group: Ipv4Addr,
    /// Port datagrams are received on.
    pub rx_port: u16,
    /// Port datagrams are sent to.
    pub tx_port: u16,
    /// Network adapter name or IPv4 address to send and join on.
    /// `None` lets the OS pick.
    pub adapter: Option<String>,
    /// Read timeout of the receive loop, and so the bound on how long
    /// `stop()` waits for it.
    pub poll_interval: Duration,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(224, 0, 1, 0),
            rx_port: 25690,
            tx_port: 25690,
            adapter: None,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl MulticastConfig {
    pub fn with_group(mut self, group: Ipv4Addr) -> Self {
        self.group = group;
        self
    }

    pub fn with_ports(mut self, rx_port: u16, tx_port: u16) -> Self {
        self.rx_port = rx_port;
        self.tx_port = tx_port;
        self
    }

    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }
}
