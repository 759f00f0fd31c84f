//! Lockstep multi-node simulation.

use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::transport::MemoryTransport;
use framelock_node::{
    ClusterDriver, FatalError, HandshakeConfig, NodeConfig, NodeStateMachine, PeerDiscovery,
    StateKind,
};
use framelock_transport::{Clock, ManualClock, TransportConfig};
use framelock_types::NodeId;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How a simulated node's host loop ended, if it has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Running,
    /// `do_frame` returned `Ok(false)`.
    Terminated,
    Failed(FatalError),
}

/// Aggregate run statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationStats {
    pub steps: u64,
    /// Frames ended across all nodes.
    pub frames_completed: u64,
    /// Largest difference in frame id seen between two synchronized nodes.
    pub max_frame_spread: u64,
}

#[derive(Debug)]
struct SimNode {
    driver: ClusterDriver<MemoryTransport>,
    /// Next `do_frame` starts a new host frame.
    new_frame: bool,
    /// The host is stuck rendering and will not end its frame.
    held: bool,
    status: NodeStatus,
}

/// Ticks a set of cluster drivers in lockstep over a simulated network.
///
/// Each step advances the clock by one tick interval, gives every running
/// node one `do_frame` (ending the frame right away when the barrier
/// allows), delivers all traffic, then runs the resend scans.
pub struct SimulationRunner {
    clock: Arc<ManualClock>,
    network: SimulatedNetwork,
    nodes: BTreeMap<NodeId, SimNode>,
    tick_interval: Duration,
    stats: SimulationStats,
}

impl SimulationRunner {
    pub fn new(config: NetworkConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        let network = SimulatedNetwork::new(config, clock.clone());
        Self {
            clock,
            network,
            nodes: BTreeMap::new(),
            tick_interval: Duration::from_millis(16),
            stats: SimulationStats::default(),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn stats(&self) -> SimulationStats {
        self.stats
    }

    // ─── Nodes ───

    pub fn add_node(
        &mut self,
        config: NodeConfig,
        discovery: Box<dyn PeerDiscovery>,
        transport: TransportConfig,
    ) -> NodeId {
        let local = config.local_id;
        let machine = NodeStateMachine::new(config, discovery);
        self.insert(local, machine, transport)
    }

    pub fn add_handshake_node(
        &mut self,
        config: NodeConfig,
        handshake: &HandshakeConfig,
        transport: TransportConfig,
    ) -> NodeId {
        let local = config.local_id;
        let machine = NodeStateMachine::with_handshake(config, handshake);
        self.insert(local, machine, transport)
    }

    fn insert(
        &mut self,
        local: NodeId,
        machine: NodeStateMachine,
        transport: TransportConfig,
    ) -> NodeId {
        let transport = self.network.add_node(local, transport);
        self.nodes.insert(
            local,
            SimNode {
                driver: ClusterDriver::new(machine, transport),
                new_frame: true,
                held: false,
                status: NodeStatus::Running,
            },
        );
        local
    }

    pub fn driver(&self, node: NodeId) -> Option<&ClusterDriver<MemoryTransport>> {
        self.nodes.get(&node).map(|n| &n.driver)
    }

    pub fn driver_mut(&mut self, node: NodeId) -> Option<&mut ClusterDriver<MemoryTransport>> {
        self.nodes.get_mut(&node).map(|n| &mut n.driver)
    }

    pub fn status(&self, node: NodeId) -> Option<&NodeStatus> {
        self.nodes.get(&node).map(|n| &n.status)
    }

    /// Frame id a node is on.
    pub fn frame(&self, node: NodeId) -> Option<u64> {
        self.driver(node).map(|d| d.current_frame_id())
    }

    /// Keep a node's host from ending its frame, or release it.
    pub fn hold(&mut self, node: NodeId, held: bool) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.held = held;
        }
    }

    pub fn all_stopped(&self) -> bool {
        self.nodes.values().all(|n| n.status != NodeStatus::Running)
    }

    // ─── Stepping ───

    pub fn step(&mut self) {
        self.clock.advance(self.tick_interval);

        for (id, node) in &mut self.nodes {
            if node.status != NodeStatus::Running {
                continue;
            }
            match node.driver.do_frame(node.new_frame) {
                Ok(true) => {
                    node.new_frame = false;
                    if !node.held
                        && node.driver.ready_to_proceed()
                        && node.driver.state_kind() == StateKind::Synchronized
                    {
                        node.driver.end_frame();
                        node.new_frame = true;
                        self.stats.frames_completed += 1;
                    }
                }
                Ok(false) => {
                    info!(node = %id, "Simulated node terminated");
                    node.status = NodeStatus::Terminated;
                }
                Err(error) => {
                    info!(node = %id, error = %error, "Simulated node failed");
                    node.status = NodeStatus::Failed(error);
                }
            }
        }

        self.network.pump_until_idle();
        let resends = self.network.run_resends();
        if resends > 0 {
            debug!(resends, "Resend scan");
            self.network.pump_until_idle();
        }

        self.stats.steps += 1;
        self.stats.max_frame_spread = self.stats.max_frame_spread.max(self.frame_spread());
    }

    pub fn run(&mut self, steps: usize) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Step until `done` holds, at most `max_steps` times. Returns whether
    /// it held.
    pub fn run_until(&mut self, max_steps: usize, mut done: impl FnMut(&Self) -> bool) -> bool {
        for _ in 0..max_steps {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    fn frame_spread(&self) -> u64 {
        let frames = self
            .nodes
            .values()
            .filter(|n| {
                n.status == NodeStatus::Running && n.driver.state_kind() == StateKind::Synchronized
            })
            .map(|n| n.driver.current_frame_id());
        let (min, max) = frames.fold((u64::MAX, 0), |(lo, hi), f| (lo.min(f), hi.max(f)));
        max.saturating_sub(min)
    }
}

impl std::fmt::Debug for SimulationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRunner")
            .field("now", &self.now())
            .field("nodes", &self.nodes.len())
            .field("stats", &self.stats)
            .finish()
    }
}
