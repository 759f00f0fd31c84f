//! Transport backed by the simulated network.

use crate::network::SimulatedNetwork;
use framelock_transport::{Endpoint, Transport};
use std::sync::Arc;
use tracing::debug;

/// A node's attachment to a [`SimulatedNetwork`].
///
/// Datagrams move only when the network is pumped, so a test controls
/// exactly when messages arrive.
#[derive(Debug)]
pub struct MemoryTransport {
    endpoint: Arc<Endpoint>,
    network: SimulatedNetwork,
    stopped: bool,
}

impl MemoryTransport {
    pub(crate) fn new(endpoint: Arc<Endpoint>, network: SimulatedNetwork) -> Self {
        Self {
            endpoint,
            network,
            stopped: false,
        }
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.network.detach(self.endpoint.local_id());
        self.endpoint.drain();
        debug!(local = %self.endpoint.local_id(), "Memory transport stopped");
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.stop();
    }
}
