//! Host loop against an in-memory cluster.

use framelock_node::{
    ClusterDriver, HandshakeConfig, NodeConfig, NodeStateMachine, StateKind, StaticDiscovery,
};
use framelock_production::{run_host_loop, HostLoopConfig};
use framelock_simulation::{NetworkConfig, SimulatedNetwork};
use framelock_transport::{ManualClock, TransportConfig};
use framelock_types::{NodeId, NodeRole};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn id(n: u8) -> NodeId {
    NodeId::new(n).unwrap()
}

fn fast_loop(max_frames: Option<u64>) -> HostLoopConfig {
    HostLoopConfig {
        frame_interval: Duration::from_millis(1),
        poll_interval: Duration::from_micros(200),
        max_frames,
        report_every: 10,
    }
}

/// Moves datagrams in the background until dropped.
struct Pump {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Pump {
    fn start(network: SimulatedNetwork) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                network.pump_until_idle();
                network.advance(Duration::from_millis(1));
                thread::sleep(Duration::from_micros(200));
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[test]
fn test_frame_limit_shuts_down_standalone_node() {
    let network = SimulatedNetwork::new(NetworkConfig::default(), Arc::new(ManualClock::default()));
    let _pump = Pump::start(network.clone());

    let transport = network.add_node(id(0), TransportConfig::default());
    let machine = NodeStateMachine::new(
        NodeConfig::new(id(0), NodeRole::Emitter),
        Box::new(StaticDiscovery::standalone(id(0))),
    );
    let mut driver = ClusterDriver::new(machine, transport);

    let shutdown = AtomicBool::new(false);
    let frames = run_host_loop(&mut driver, &fast_loop(Some(5)), &shutdown).unwrap();

    assert_eq!(frames, 5);
    assert!(driver.is_terminated());
    assert_eq!(driver.state_kind(), StateKind::Shutdown);
    assert_eq!(driver.frame_stats().frames_completed, 5);
}

#[test]
fn test_shutdown_flag_stops_two_node_cluster() {
    let network = SimulatedNetwork::new(NetworkConfig::default(), Arc::new(ManualClock::default()));
    let _pump = Pump::start(network.clone());
    let handshake = HandshakeConfig::default()
        .with_expected_repeaters(1)
        .with_hello_interval(Duration::from_millis(5));

    let mut drivers: Vec<_> = [(0, NodeRole::Emitter), (1, NodeRole::Repeater)]
        .into_iter()
        .map(|(n, role)| {
            let transport = network.add_node(id(n), TransportConfig::default());
            let config =
                NodeConfig::new(id(n), role).with_communication_timeout(Duration::from_secs(60));
            let machine = NodeStateMachine::with_handshake(config, &handshake);
            ClusterDriver::new(machine, transport)
        })
        .collect();
    let repeater = drivers.pop().unwrap();
    let mut emitter = drivers.pop().unwrap();

    let repeater_thread = thread::spawn(move || {
        let mut repeater = repeater;
        let never = AtomicBool::new(false);
        let frames = run_host_loop(&mut repeater, &fast_loop(None), &never);
        (frames, repeater.is_terminated())
    });

    let frames = run_host_loop(&mut emitter, &fast_loop(Some(20)), &AtomicBool::new(false)).unwrap();
    assert_eq!(frames, 20);

    let (repeater_frames, terminated) = repeater_thread.join().unwrap();
    let repeater_frames = repeater_frames.unwrap();
    assert!(terminated);
    assert!(repeater_frames >= 19, "repeater ran {repeater_frames} frames");
}
