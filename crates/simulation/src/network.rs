//! In-memory multicast network with deterministic loss and duplication.

use crate::transport::MemoryTransport;
use framelock_transport::{Endpoint, ManualClock, TransportConfig};
use framelock_types::NodeId;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Upper bound on delivery rounds in [`SimulatedNetwork::pump_until_idle`].
const MAX_PUMP_ROUNDS: usize = 64;

/// Configuration for the simulated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Probability (0.0 - 1.0) that a datagram is lost on its way to one receiver.
    pub packet_loss_rate: f64,
    /// Probability (0.0 - 1.0) that a delivered datagram arrives twice.
    pub duplicate_rate: f64,
    /// Seed for loss and duplication decisions.
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            packet_loss_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 42,
        }
    }
}

/// Datagram counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Datagrams taken off a node's outbound queue.
    pub datagrams_sent: u64,
    /// Datagrams discarded because the sender's outbound path was failing.
    pub dropped_outbound: u64,
    /// Per-receiver deliveries, duplicates included.
    pub delivered: u64,
    pub dropped_loss: u64,
    pub dropped_blocked: u64,
    pub duplicated: u64,
}

#[derive(Debug)]
struct NetworkState {
    config: NetworkConfig,
    rng: ChaCha8Rng,
    endpoints: BTreeMap<NodeId, Arc<Endpoint>>,
    /// Directional link cuts: datagrams from `.0` to `.1` are dropped.
    blocked: HashSet<(NodeId, NodeId)>,
    failing_outbound: HashSet<NodeId>,
    stats: NetworkStats,
}

/// Shared handle to a simulated multicast segment.
///
/// Every datagram a node sends is offered to every attached node, the
/// sender included; the receiving endpoint filters by origin and
/// destination exactly as it would on a real socket.
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    state: Arc<Mutex<NetworkState>>,
    clock: Arc<ManualClock>,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig, clock: Arc<ManualClock>) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                config,
                rng,
                endpoints: BTreeMap::new(),
                blocked: HashSet::new(),
                failing_outbound: HashSet::new(),
                stats: NetworkStats::default(),
            })),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Attach a node and return its transport.
    pub fn add_node(&self, local: NodeId, config: TransportConfig) -> MemoryTransport {
        let endpoint = Arc::new(Endpoint::new(local, config, self.clock.clone()));
        self.state.lock().endpoints.insert(local, endpoint.clone());
        MemoryTransport::new(endpoint, self.clone())
    }

    /// Remove a node from the segment. Its queued datagrams are lost.
    pub fn detach(&self, node: NodeId) {
        self.state.lock().endpoints.remove(&node);
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        self.state.lock().endpoints.contains_key(&node)
    }

    // ─── Link Cuts ───

    /// Drop every datagram from `from` to `to`.
    pub fn block(&self, from: NodeId, to: NodeId) {
        self.state.lock().blocked.insert((from, to));
    }

    pub fn block_bidirectional(&self, a: NodeId, b: NodeId) {
        let mut state = self.state.lock();
        state.blocked.insert((a, b));
        state.blocked.insert((b, a));
    }

    pub fn unblock(&self, from: NodeId, to: NodeId) {
        self.state.lock().blocked.remove(&(from, to));
    }

    pub fn heal_all(&self) {
        self.state.lock().blocked.clear();
    }

    /// Make every datagram `node` sends disappear before reaching the wire.
    pub fn set_outbound_failing(&self, node: NodeId, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_outbound.insert(node);
        } else {
            state.failing_outbound.remove(&node);
        }
    }

    // ─── Loss ───

    pub fn set_packet_loss_rate(&self, rate: f64) {
        self.state.lock().config.packet_loss_rate = rate.clamp(0.0, 1.0);
    }

    pub fn set_duplicate_rate(&self, rate: f64) {
        self.state.lock().config.duplicate_rate = rate.clamp(0.0, 1.0);
    }

    pub fn stats(&self) -> NetworkStats {
        self.state.lock().stats
    }

    // ─── Delivery ───

    /// Move every datagram currently queued on any node to its receivers.
    /// Datagrams produced by the deliveries (acks) wait for the next round.
    /// Returns the number of datagrams taken off outbound queues.
    pub fn pump(&self) -> usize {
        let mut state = self.state.lock();
        let endpoints: Vec<(NodeId, Arc<Endpoint>)> = state
            .endpoints
            .iter()
            .map(|(id, endpoint)| (*id, endpoint.clone()))
            .collect();

        let mut outgoing = Vec::new();
        for (from, endpoint) in &endpoints {
            while let Some(datagram) = endpoint.try_next_outbound() {
                outgoing.push((*from, datagram));
            }
        }

        let sent = outgoing.len();
        for (from, datagram) in outgoing {
            state.stats.datagrams_sent += 1;
            if state.failing_outbound.contains(&from) {
                state.stats.dropped_outbound += 1;
                continue;
            }
            for (to, endpoint) in &endpoints {
                if state.blocked.contains(&(from, *to)) {
                    state.stats.dropped_blocked += 1;
                    continue;
                }
                let loss = state.config.packet_loss_rate;
                if loss > 0.0 && state.rng.gen::<f64>() < loss {
                    trace!(from = %from, to = %to, "Datagram lost");
                    state.stats.dropped_loss += 1;
                    continue;
                }
                let copies = {
                    let dup = state.config.duplicate_rate;
                    if dup > 0.0 && state.rng.gen::<f64>() < dup {
                        state.stats.duplicated += 1;
                        2
                    } else {
                        1
                    }
                };
                for _ in 0..copies {
                    state.stats.delivered += 1;
                    endpoint.handle_datagram(&datagram);
                }
            }
        }
        sent
    }

    /// Pump until no node has anything left to send.
    pub fn pump_until_idle(&self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_PUMP_ROUNDS {
            let sent = self.pump();
            if sent == 0 {
                break;
            }
            total += sent;
        }
        total
    }

    /// Run every endpoint's resend scan. Returns the number of resends queued.
    pub fn run_resends(&self) -> usize {
        let endpoints: Vec<Arc<Endpoint>> = self.state.lock().endpoints.values().cloned().collect();
        endpoints.iter().map(|e| e.resend_due()).sum()
    }

    /// Advance the clock and run the resend scans that became due.
    pub fn advance(&self, by: Duration) -> usize {
        self.clock.advance(by);
        self.run_resends()
    }
}
