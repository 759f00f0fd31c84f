//! Whole-cluster scenarios: handshake, coordinated shutdown, lossy links.

use bytes::Bytes;
use framelock_node::{
    FatalError, HandshakeConfig, NodeConfig, PeerSet, StateKind, StaticDiscovery,
};
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

fn handshake_config() -> HandshakeConfig {
    HandshakeConfig::default()
        .with_expected_repeaters(2)
        .with_handshake_timeout(Duration::from_secs(5))
        .with_hello_interval(Duration::from_millis(100))
}

fn static_cluster(network: NetworkConfig, node_config: impl Fn(NodeId, NodeRole) -> NodeConfig) -> SimulationRunner {
    let mut runner = SimulationRunner::new(network);
    let peers = PeerSet {
        emitter: id(0),
        repeaters: NodeMask::from_bits(0b110),
        frame: FrameId::ZERO,
    };
    for n in 0..3 {
        let role = if n == 0 {
            NodeRole::Emitter
        } else {
            NodeRole::Repeater
        };
        runner.add_node(
            node_config(id(n), role),
            Box::new(StaticDiscovery::new(id(n), peers)),
            transport_config(),
        );
    }
    runner
}

#[test]
fn test_handshake_forms_cluster() {
    let mut runner = SimulationRunner::new(NetworkConfig::default());
    let handshake = handshake_config();
    // Repeaters come up first and keep shouting until the emitter appears.
    for n in 1..=2 {
        runner.add_handshake_node(
            NodeConfig::new(id(n), NodeRole::Repeater),
            &handshake,
            transport_config(),
        );
    }
    runner.add_handshake_node(
        NodeConfig::new(id(0), NodeRole::Emitter),
        &handshake,
        transport_config(),
    );

    let formed = runner.run_until(500, |r| {
        (0..=2).all(|n| {
            r.driver(id(n)).unwrap().state_kind() == StateKind::Synchronized
                && r.frame(id(n)).unwrap() >= 5
        })
    });
    assert!(formed);
    assert!(runner.stats().max_frame_spread <= 1);
}

#[test]
fn test_backup_joins_like_a_repeater() {
    let mut runner = SimulationRunner::new(NetworkConfig::default());
    let handshake = handshake_config().with_expected_repeaters(1);
    runner.add_handshake_node(
        NodeConfig::new(id(0), NodeRole::Emitter),
        &handshake,
        transport_config(),
    );
    runner.add_handshake_node(
        NodeConfig::new(id(5), NodeRole::Backup),
        &handshake,
        transport_config(),
    );

    assert!(runner.run_until(300, |r| r.frame(id(5)).unwrap() >= 3));
}

#[test]
fn test_repeater_without_emitter_times_out() {
    let mut runner = SimulationRunner::new(NetworkConfig::default());
    let handshake = handshake_config().with_handshake_timeout(Duration::from_millis(500));
    runner.add_handshake_node(
        NodeConfig::new(id(1), NodeRole::Repeater),
        &handshake,
        transport_config(),
    );

    assert!(runner.run_until(100, |r| r.all_stopped()));
    assert_eq!(
        runner.status(id(1)),
        Some(&NodeStatus::Failed(FatalError::HandshakeTimeout(
            Duration::from_millis(500)
        )))
    );
}

#[test]
fn test_shutdown_from_repeater_stops_everyone() {
    let mut runner = static_cluster(NetworkConfig::default(), NodeConfig::new);
    runner.run(30);
    assert!(runner.frame(id(0)).unwrap() > 5);

    runner.driver_mut(id(2)).unwrap().broadcast_shutdown_request();
    assert!(runner.run_until(300, |r| r.all_stopped()));

    for n in 0..3 {
        assert_eq!(runner.status(id(n)), Some(&NodeStatus::Terminated));
        let driver = runner.driver(id(n)).unwrap();
        assert!(driver.is_terminated());
        assert_eq!(driver.state_kind(), StateKind::Shutdown);
    }
}

#[test]
fn test_lockstep_under_packet_loss() {
    let network = NetworkConfig {
        packet_loss_rate: 0.2,
        seed: 7,
        ..Default::default()
    };
    let mut runner = static_cluster(network, |local, role| {
        NodeConfig::new(local, role).with_communication_timeout(Duration::from_secs(30))
    });
    runner.run(1000);

    for n in 0..3 {
        assert_eq!(runner.status(id(n)), Some(&NodeStatus::Running));
        assert!(runner.frame(id(n)).unwrap() >= 20, "node {n} stalled");
    }
    assert!(runner.stats().max_frame_spread <= 1);
    assert!(runner.network().stats().dropped_loss > 0);
}

#[test]
fn test_app_data_reaches_repeaters() {
    let mut runner = static_cluster(NetworkConfig::default(), NodeConfig::new);
    runner.run(5);

    runner
        .driver(id(0))
        .unwrap()
        .publish_app_data(Bytes::from_static(b"rpc"))
        .unwrap();
    runner.run(5);

    for n in 1..3 {
        let message = runner
            .driver_mut(id(n))
            .unwrap()
            .next_app_message()
            .expect("app data delivered");
        assert_eq!(message.header.origin, id(0));
        assert_eq!(message.payload, Bytes::from_static(b"rpc"));
    }
    assert!(!runner.driver(id(0)).unwrap().node().transport().unwrap().has_pending_acks());
}

#[test]
fn test_repeater_app_data_follows_known_peers() {
    // Statically configured repeaters know the whole cluster.
    let mut runner = static_cluster(NetworkConfig::default(), NodeConfig::new);
    runner.run(5);
    runner
        .driver(id(1))
        .unwrap()
        .publish_app_data(Bytes::from_static(b"status"))
        .unwrap();
    runner.run(5);
    for n in [0, 2] {
        assert!(runner.driver_mut(id(n)).unwrap().next_app_message().is_some());
    }

    // A handshaking repeater only learns the emitter.
    let mut runner = SimulationRunner::new(NetworkConfig::default());
    let handshake = handshake_config();
    runner.add_handshake_node(
        NodeConfig::new(id(0), NodeRole::Emitter),
        &handshake,
        transport_config(),
    );
    for n in 1..=2 {
        runner.add_handshake_node(
            NodeConfig::new(id(n), NodeRole::Repeater),
            &handshake,
            transport_config(),
        );
    }
    assert!(runner.run_until(500, |r| (0..=2).all(|n| r.frame(id(n)).unwrap() >= 2)));

    runner
        .driver(id(1))
        .unwrap()
        .publish_app_data(Bytes::from_static(b"status"))
        .unwrap();
    runner.run(5);

    let message = runner.driver_mut(id(0)).unwrap().next_app_message().unwrap();
    assert_eq!(message.header.origin, id(1));
    assert_eq!(message.header.destinations & !id(1).mask(), id(0).mask());
    assert!(runner.driver_mut(id(2)).unwrap().next_app_message().is_none());
    assert!(!runner.driver(id(1)).unwrap().node().transport().unwrap().has_pending_acks());
}
