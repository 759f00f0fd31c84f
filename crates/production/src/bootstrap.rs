//! Building a UDP-backed driver from configuration.

use crate::config::ClusterConfig;
use framelock_node::{ClusterDriver, FatalError, NodeStateMachine, StaticDiscovery};
use framelock_transport::{SystemClock, UdpTransport};
use std::sync::Arc;
use tracing::{error, info};

/// Start the multicast transport and wrap it in a driver.
///
/// A transport that fails to start is not retried: the returned driver's
/// node is already in `FatalError` and the first `do_frame` reports it.
pub fn start_udp(config: &ClusterConfig) -> ClusterDriver<UdpTransport> {
    let node_config = config.node_config();
    let local = node_config.local_id;
    let clock = Arc::new(SystemClock::new());

    let transport = match UdpTransport::start_with_clock(
        local,
        config.multicast_config(),
        config.transport_config(),
        clock.clone(),
    ) {
        Ok(transport) => transport,
        Err(e) => {
            error!(local = %local, error = %e, "Failed to start multicast transport");
            return ClusterDriver::failed(node_config, FatalError::TransportStart(e.to_string()), clock);
        }
    };

    info!(
        local = %local,
        role = %node_config.role,
        group = %config.network.group,
        rx_port = config.network.rx_port,
        tx_port = config.network.tx_port,
        standalone = config.node.standalone,
        "Multicast transport started"
    );

    let machine = if config.node.standalone {
        NodeStateMachine::new(node_config, Box::new(StaticDiscovery::standalone(local)))
    } else {
        NodeStateMachine::with_handshake(node_config, &config.handshake_config())
    };
    ClusterDriver::new(machine, transport)
}
