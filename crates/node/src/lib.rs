//! Node role state machine and cluster driver.
//!
//! [`NodeStateMachine`] turns the reliable transport into a cluster-wide
//! frame barrier: no node renders frame N+1 until the emitter has seen every
//! repeater ready for it. [`ClusterNode`] executes the machine's actions
//! against a [`framelock_transport::Transport`], and [`ClusterDriver`] is
//! the per-tick entry point the host loop calls.
//!
//! ```text
//! host tick ─► ClusterDriver::do_frame ─► ClusterNode::step
//!                                           │ Event::Tick, Event::MessageReceived...
//!                                           ▼
//!                                   NodeStateMachine ─► Vec<Action> ─► Transport
//! ```

mod barrier;
mod config;
mod discovery;
mod driver;
mod error;
mod machine;
mod runner;
mod state;

pub use barrier::{Barrier, EmitterBarrier, EmitterStage, RepeaterBarrier, RepeaterStage};
pub use config::NodeConfig;
pub use discovery::{
    DiscoveryOutcome, DiscoveryStep, HandshakeConfig, HandshakeDiscovery, PeerDiscovery, PeerSet,
    StaticDiscovery,
};
pub use driver::{ClusterDriver, FrameStats};
pub use error::FatalError;
pub use machine::NodeStateMachine;
pub use runner::ClusterNode;
pub use state::{NodeState, StateKind, Transition, TransitionContext};
