//! Production bootstrap for frame-locked cluster nodes.
//!
//! Loads [`ClusterConfig`] from TOML, installs logging, starts the UDP
//! multicast transport through [`start_udp`] and runs the host frame loop.
//! The `framelock-node` binary ties these together.

mod bootstrap;
mod config;
mod host;
mod telemetry;

pub use bootstrap::start_udp;
pub use config::{ClusterConfig, LoggingSection, NetworkSection, NodeSection, TimingSection};
pub use host::{run_host_loop, HostLoopConfig};
pub use telemetry::init_logging;
