//! Deterministic simulation of a frame-locked cluster.
//!
//! Every node runs the production state machine and reliable endpoint; only
//! the wire is replaced. Given the same seed a run is reproducible.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SimulationRunner                      │
//! │   ManualClock ── advances one tick interval per step     │
//! │                                                          │
//! │   ClusterDriver<MemoryTransport> × N  (do_frame/end)     │
//! │                 │ publish               ▲ receive        │
//! │                 ▼                       │                │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │  SimulatedNetwork: Endpoint per node               │  │
//! │  │  multicast fan-out, loss, duplication, link cuts   │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod network;
mod runner;
mod transport;

pub use network::{NetworkConfig, NetworkStats, SimulatedNetwork};
pub use runner::{NodeStatus, SimulationRunner, SimulationStats};
pub use transport::MemoryTransport;
