//! Frame barrier across an emitter and several repeaters.

use framelock_node::{NodeConfig, PeerSet, StateKind, StaticDiscovery};
use framelock_simulation::{NetworkConfig, NodeStatus, SimulationRunner};
use framelock_transport::{Transport, TransportConfig};
use framelock_types::{FrameId, NodeId, NodeMask, NodeRole};
use std::time::Duration;

fn id(n: u8) -> NodeId {
    NodeId::new(n).unwrap()
}

fn transport_config() -> TransportConfig {
    TransportConfig::default().with_accepted_ack_delay(Duration::from_millis(50))
}

/// Emitter 0 plus repeaters `1..=repeaters`, all knowing each other up front.
fn cluster(repeaters: u8, config: impl Fn(NodeId, NodeRole) -> NodeConfig) -> SimulationRunner {
    let mut runner = SimulationRunner::new(NetworkConfig::default());
    let peers = PeerSet {
        emitter: id(0),
        repeaters: (1..=repeaters).map(id).collect::<NodeMask>(),
        frame: FrameId::ZERO,
    };
    for n in 0..=repeaters {
        let role = if n == 0 {
            NodeRole::Emitter
        } else {
            NodeRole::Repeater
        };
        runner.add_node(
            config(id(n), role),
            Box::new(StaticDiscovery::new(id(n), peers)),
            transport_config(),
        );
    }
    runner
}

/// Every node with the same short communication timeout.
fn short_timeout(local: NodeId, role: NodeRole) -> NodeConfig {
    NodeConfig::new(local, role).with_communication_timeout(Duration::from_millis(500))
}

fn emitter_config() -> NodeConfig {
    NodeConfig::new(id(0), NodeRole::Emitter)
}

/// Frame spread across the given nodes.
fn spread(runner: &SimulationRunner, nodes: &[u8]) -> u64 {
    let frames: Vec<u64> = nodes.iter().map(|&n| runner.frame(id(n)).unwrap()).collect();
    frames.iter().max().unwrap() - frames.iter().min().unwrap()
}

fn assert_evicted(runner: &SimulationRunner, node: NodeId) {
    assert!(!runner
        .driver(id(0))
        .unwrap()
        .node()
        .transport()
        .unwrap()
        .all_nodes()
        .contains(node));
}

#[test]
fn test_cluster_advances_in_lockstep() {
    let mut runner = cluster(3, NodeConfig::new);
    runner.run(200);

    for n in 0..=3 {
        assert_eq!(runner.status(id(n)), Some(&NodeStatus::Running));
        assert!(runner.frame(id(n)).unwrap() >= 20, "node {n} stalled");
    }
    assert!(runner.stats().max_frame_spread <= 1);
}

#[test]
fn test_never_ready_repeater_blocks_cluster() {
    let mut runner = cluster(3, |local, role| {
        short_timeout(local, role).with_evict_late_repeaters(false)
    });
    runner.run(20);

    runner.hold(id(2), true);
    let held_frame = runner.frame(id(2)).unwrap();
    // 800ms: past the readiness deadline, inside the repeaters' grace.
    runner.run(50);

    assert_eq!(runner.frame(id(2)), Some(held_frame));
    assert_eq!(runner.frame(id(0)), Some(held_frame + 1));
    for n in [1, 3] {
        assert_eq!(runner.status(id(n)), Some(&NodeStatus::Running));
        assert_eq!(runner.frame(id(n)), Some(held_frame + 1));
        assert!(!runner.driver(id(n)).unwrap().ready_to_proceed());
    }
    let emitter = runner.driver(id(0)).unwrap();
    assert!(!emitter.ready_to_proceed());
    assert!(emitter.debug_string().contains("waiting_on={2}"));

    runner.hold(id(2), false);
    runner.run(20);
    for n in 0..=3 {
        assert_eq!(runner.status(id(n)), Some(&NodeStatus::Running));
        assert!(runner.frame(id(n)).unwrap() > held_frame + 2);
    }
    assert!(runner.stats().max_frame_spread <= 1);
}

#[test]
fn test_late_repeater_evicted_before_healthy_repeaters_give_up() {
    let mut runner = cluster(3, short_timeout);
    runner.run(20);

    runner.hold(id(2), true);
    let held_frame = runner.frame(id(2)).unwrap();
    // 3.2s: several times every node's deadline.
    runner.run(200);

    assert_evicted(&runner, id(2));
    for n in [0, 1, 3] {
        assert_eq!(runner.status(id(n)), Some(&NodeStatus::Running));
        assert!(runner.frame(id(n)).unwrap() > held_frame + 10, "node {n} stalled");
    }
    assert!(spread(&runner, &[0, 1, 3]) <= 1);

    // Still advancing after the eviction.
    let before = runner.frame(id(1)).unwrap();
    runner.run(40);
    assert!(runner.frame(id(1)).unwrap() >= before + 10);
}

#[test]
fn test_default_config_survives_stalled_repeater() {
    let mut runner = cluster(3, NodeConfig::new);
    runner.run(20);

    runner.hold(id(2), true);
    let held_frame = runner.frame(id(2)).unwrap();
    // 6.4s: past the 5s eviction deadline and the 6s repeater deadline.
    runner.run(400);

    assert_evicted(&runner, id(2));
    for n in [0, 1, 3] {
        assert_eq!(runner.status(id(n)), Some(&NodeStatus::Running));
        assert!(runner.frame(id(n)).unwrap() > held_frame + 10, "node {n} stalled");
    }
    assert!(spread(&runner, &[0, 1, 3]) <= 1);
}

#[test]
fn test_standalone_emitter_never_waits() {
    let mut runner = SimulationRunner::new(NetworkConfig::default());
    runner.add_node(
        emitter_config(),
        Box::new(StaticDiscovery::standalone(id(0))),
        transport_config(),
    );
    runner.run(50);

    let driver = runner.driver(id(0)).unwrap();
    assert_eq!(driver.state_kind(), StateKind::Synchronized);
    assert_eq!(driver.current_frame_id(), 49);
    assert_eq!(driver.network_stats().total_sent_count, 0);
}
