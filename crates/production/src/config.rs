//! Node process configuration loaded from TOML.
//!
//! ```toml
//! [node]
//! node_id = 1
//! role = "repeater"
//!
//! [network]
//! group = "224.0.1.0"
//! rx_port = 25690
//! tx_port = 25690
//! adapter = "eth0"
//!
//! [timing]
//! handshake_timeout_ms = 30000
//! communication_timeout_ms = 5000
//! repeater_grace_ms = 1000
//! target_fps = 60
//!
//! [logging]
//! log_file = "./logs/node-1.log"
//! ```

use anyhow::{Context, Result};
use framelock_node::{HandshakeConfig, NodeConfig};
use framelock_transport::{MulticastConfig, TransportConfig};
use framelock_types::{NodeId, NodeRole};
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level node process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Node identity
    pub node: NodeSection,

    /// Multicast group and sockets
    #[serde(default)]
    pub network: NetworkSection,

    /// Handshake, acknowledgment and frame timing
    #[serde(default)]
    pub timing: TimingSection,

    /// Log output
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Node identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    /// Id in `[0, 63]`, unique in the cluster
    pub node_id: NodeId,

    pub role: NodeRole,

    /// Repeaters the emitter waits for during the handshake
    #[serde(default)]
    pub repeaters: usize,

    /// Run without cluster logic
    #[serde(default)]
    pub standalone: bool,

    /// Let the emitter drop repeaters that miss the readiness deadline
    #[serde(default = "default_evict_late_repeaters")]
    pub evict_late_repeaters: bool,

    /// Mark outgoing messages as coming from an editor session
    #[serde(default)]
    pub editor: bool,
}

fn default_evict_late_repeaters() -> bool {
    true
}

/// Multicast configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_group")]
    pub group: Ipv4Addr,

    #[serde(default = "default_port")]
    pub rx_port: u16,

    #[serde(default = "default_port")]
    pub tx_port: u16,

    /// Interface name or IPv4 address to send and receive on
    #[serde(default)]
    pub adapter: Option<String>,

    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            group: default_group(),
            rx_port: default_port(),
            tx_port: default_port(),
            adapter: None,
            max_datagram_size: default_max_datagram_size(),
        }
    }
}

fn default_group() -> Ipv4Addr {
    Ipv4Addr::new(224, 0, 1, 0)
}

fn default_port() -> u16 {
    25690
}

fn default_max_datagram_size() -> usize {
    65_507
}

/// Timing configuration. All durations in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingSection {
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_hello_interval_ms")]
    pub hello_interval_ms: u64,

    #[serde(default = "default_communication_timeout_ms")]
    pub communication_timeout_ms: u64,

    /// Extra time a repeater waits for the go signal beyond the
    /// communication timeout
    #[serde(default = "default_repeater_grace_ms")]
    pub repeater_grace_ms: u64,

    #[serde(default = "default_accepted_ack_delay_ms")]
    pub accepted_ack_delay_ms: u64,

    #[serde(default = "default_resend_interval_ms")]
    pub resend_interval_ms: u64,

    #[serde(default = "default_shutdown_drain_timeout_ms")]
    pub shutdown_drain_timeout_ms: u64,

    /// Shut down when no new frame starts within this budget
    #[serde(default)]
    pub debug_tick_budget_ms: Option<u64>,

    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            hello_interval_ms: default_hello_interval_ms(),
            communication_timeout_ms: default_communication_timeout_ms(),
            repeater_grace_ms: default_repeater_grace_ms(),
            accepted_ack_delay_ms: default_accepted_ack_delay_ms(),
            resend_interval_ms: default_resend_interval_ms(),
            shutdown_drain_timeout_ms: default_shutdown_drain_timeout_ms(),
            debug_tick_budget_ms: None,
            target_fps: default_target_fps(),
        }
    }
}

fn default_handshake_timeout_ms() -> u64 {
    30_000
}

fn default_hello_interval_ms() -> u64 {
    1_000
}

fn default_communication_timeout_ms() -> u64 {
    5_000
}

fn default_repeater_grace_ms() -> u64 {
    1_000
}

fn default_accepted_ack_delay_ms() -> u64 {
    1_000
}

fn default_resend_interval_ms() -> u64 {
    5
}

fn default_shutdown_drain_timeout_ms() -> u64 {
    1_000
}

fn default_target_fps() -> u32 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSection {
    /// Write logs to this file instead of stdout
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl ClusterConfig {
    /// Configuration with every default and the given identity.
    pub fn new(node_id: NodeId, role: NodeRole) -> Self {
        Self {
            node: NodeSection {
                node_id,
                role,
                repeaters: 0,
                standalone: false,
                evict_late_repeaters: default_evict_late_repeaters(),
                editor: false,
            },
            network: NetworkSection::default(),
            timing: TimingSection::default(),
            logging: LoggingSection::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig::new(self.node.node_id, self.node.role)
            .with_communication_timeout(ms(self.timing.communication_timeout_ms))
            .with_repeater_grace(ms(self.timing.repeater_grace_ms))
            .with_evict_late_repeaters(self.node.evict_late_repeaters)
            .with_debug_tick_budget(self.timing.debug_tick_budget_ms.map(ms))
            .with_shutdown_drain_timeout(ms(self.timing.shutdown_drain_timeout_ms))
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig::default()
            .with_expected_repeaters(self.node.repeaters)
            .with_handshake_timeout(ms(self.timing.handshake_timeout_ms))
            .with_hello_interval(ms(self.timing.hello_interval_ms))
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::default()
            .with_accepted_ack_delay(ms(self.timing.accepted_ack_delay_ms))
            .with_communication_timeout(ms(self.timing.communication_timeout_ms))
            .with_resend_interval(ms(self.timing.resend_interval_ms))
            .with_max_datagram_size(self.network.max_datagram_size)
            .with_sent_from_editor(self.node.editor)
    }

    pub fn multicast_config(&self) -> MulticastConfig {
        let config = MulticastConfig::default()
            .with_group(self.network.group)
            .with_ports(self.network.rx_port, self.network.tx_port);
        match &self.network.adapter {
            Some(adapter) => config.with_adapter(adapter.clone()),
            None => config,
        }
    }

    /// Time budget of one frame at the target rate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.timing.target_fps.max(1)
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
