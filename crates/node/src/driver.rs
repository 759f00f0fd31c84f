//! Per-tick entry point for the host.

use crate::config::NodeConfig;
use crate::error::FatalError;
use crate::machine::NodeStateMachine;
use crate::runner::ClusterNode;
use crate::state::StateKind;
use bytes::Bytes;
use framelock_core::{Event, OutboundMessage};
use framelock_messages::Message;
use framelock_transport::{Clock, NetworkingStats, Transport, TransportError};
use framelock_types::{NodeId, NodeRole, SequenceId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Frame timing collected by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    /// Frames the host finished while synchronized.
    pub frames_completed: u64,
    /// Time the last frame spent waiting on the barrier.
    pub last_barrier_wait: Duration,
    /// Running average of the barrier wait.
    pub average_barrier_wait: Duration,
    /// Running average of the time between frame ends.
    pub average_frame_interval: Duration,
}

impl FrameStats {
    fn record_barrier_wait(&mut self, wait: Duration) {
        self.last_barrier_wait = wait;
        self.average_barrier_wait = ema(self.average_barrier_wait, wait);
    }

    fn record_frame_interval(&mut self, interval: Duration) {
        self.average_frame_interval = ema(self.average_frame_interval, interval);
    }

    /// Frames per second implied by the average frame interval.
    pub fn fps(&self) -> f64 {
        let secs = self.average_frame_interval.as_secs_f64();
        if secs > 0.0 {
            1.0 / secs
        } else {
            0.0
        }
    }
}

/// Exponential moving average giving the newest sample a weight of 1/10.
fn ema(average: Duration, sample: Duration) -> Duration {
    if average.is_zero() {
        return sample;
    }
    (average * 9 + sample) / 10
}

impl fmt::Display for FrameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames={} fps={:.1} sync={:.2}ms",
            self.frames_completed,
            self.fps(),
            self.average_barrier_wait.as_secs_f64() * 1000.0
        )
    }
}

/// Owns the local node and decides, tick by tick, whether the host should
/// keep going.
///
/// The host calls [`ClusterDriver::do_frame`] until
/// [`ClusterDriver::ready_to_proceed`] is true, renders, then calls
/// [`ClusterDriver::end_frame`].
#[derive(Debug)]
pub struct ClusterDriver<T: Transport> {
    node: ClusterNode<T>,
    stats: FrameStats,
    /// When the current barrier wait started.
    waiting_since: Option<Duration>,
    last_frame_end: Option<Duration>,
    terminated: bool,
}

impl<T: Transport> ClusterDriver<T> {
    pub fn new(machine: NodeStateMachine, transport: T) -> Self {
        Self::from_node(ClusterNode::new(machine, transport))
    }

    /// A driver whose node failed before reaching the network. The error
    /// surfaces from the first [`ClusterDriver::do_frame`].
    pub fn failed(config: NodeConfig, error: FatalError, clock: Arc<dyn Clock>) -> Self {
        Self::from_node(ClusterNode::without_transport(
            NodeStateMachine::failed(config, error),
            clock,
        ))
    }

    pub fn from_node(node: ClusterNode<T>) -> Self {
        Self {
            node,
            stats: FrameStats::default(),
            waiting_since: None,
            last_frame_end: None,
            terminated: false,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Host Loop
    // ═══════════════════════════════════════════════════════════════════════

    /// Advance the node by one step.
    ///
    /// Returns `Ok(false)` once the node has shut down and its outbound
    /// traffic has drained, and the node's error once it has failed. The
    /// transport is stopped in both cases.
    pub fn do_frame(&mut self, is_new_frame: bool) -> Result<bool, FatalError> {
        if self.terminated {
            return Ok(false);
        }
        self.check_fatal()?;

        self.node.step(is_new_frame);
        self.check_fatal()?;

        let now = self.node.now();
        if let Some(since) = self.node.machine().shutdown_since() {
            if self.shutdown_drained(now.saturating_sub(since)) {
                info!(local = %self.local_id(), frame = %self.node.machine().current_frame(), "Node shut down");
                self.node.stop_transport();
                self.terminated = true;
                return Ok(false);
            }
            return Ok(true);
        }

        if self.node.machine().ready_to_proceed() {
            if let Some(since) = self.waiting_since.take() {
                self.stats.record_barrier_wait(now.saturating_sub(since));
            }
        } else if self.node.machine().state_kind() == StateKind::Synchronized {
            self.waiting_since.get_or_insert(now);
        }
        Ok(true)
    }

    fn check_fatal(&mut self) -> Result<(), FatalError> {
        match self.node.machine().fatal_error() {
            Some(error) => {
                let error = error.clone();
                self.node.stop_transport();
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn shutdown_drained(&self, elapsed: Duration) -> bool {
        let Some(transport) = self.node.transport() else {
            return true;
        };
        if !transport.is_tx_queue_empty() {
            return false;
        }
        !transport.has_pending_acks()
            || elapsed >= self.node.machine().config().shutdown_drain_timeout
    }

    /// Whether the host may render the current frame.
    pub fn ready_to_proceed(&self) -> bool {
        self.node.machine().ready_to_proceed()
    }

    /// The host finished rendering the current frame.
    pub fn end_frame(&mut self) {
        let before = self.node.machine().current_frame();
        self.node.dispatch(Event::FrameEnded);
        if self.node.machine().current_frame() == before {
            return;
        }

        let now = self.node.now();
        if let Some(last) = self.last_frame_end.replace(now) {
            self.stats.record_frame_interval(now.saturating_sub(last));
        }
        self.stats.frames_completed += 1;
        self.waiting_since = Some(now);
        debug!(frame = %self.node.machine().current_frame(), "Frame ended");
    }

    /// Ask every node, this one included, to shut down.
    pub fn broadcast_shutdown_request(&mut self) {
        info!(local = %self.local_id(), "Broadcasting shutdown request");
        self.node.dispatch(Event::ClusterShutdownRequested);
    }

    /// Shut this node down without telling the rest of the cluster.
    pub fn request_local_shutdown(&mut self) {
        self.node.dispatch(Event::LocalShutdownRequested);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Application Data
    // ═══════════════════════════════════════════════════════════════════════

    /// Broadcast an application payload to every registered node.
    pub fn publish_app_data(&self, payload: Bytes) -> Result<SequenceId, TransportError> {
        let transport = self.node.transport().ok_or(TransportError::Stopped)?;
        let message = OutboundMessage::data(payload);
        transport.publish(message.header(), message.payload)
    }

    pub fn next_app_message(&mut self) -> Option<Message> {
        self.node.next_app_message()
    }

    /// Attach state to the next go signal. Emitter only.
    pub fn set_frame_state(&mut self, state: Bytes) {
        self.node.machine_mut().set_frame_state(state);
    }

    /// State that came with the current frame's go signal. Repeaters only.
    pub fn take_frame_state(&mut self) -> Option<Bytes> {
        self.node.machine_mut().take_frame_state()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn current_frame_id(&self) -> u64 {
        self.node.machine().current_frame().0
    }

    pub fn network_stats(&self) -> NetworkingStats {
        self.node
            .transport()
            .map(|t| t.stats())
            .unwrap_or_default()
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }

    pub fn role(&self) -> NodeRole {
        self.node.machine().role()
    }

    pub fn local_id(&self) -> NodeId {
        self.node.machine().local_id()
    }

    pub fn state_kind(&self) -> StateKind {
        self.node.machine().state_kind()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn node(&self) -> &ClusterNode<T> {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut ClusterNode<T> {
        &mut self.node
    }

    /// One-line status for on-screen diagnostics.
    pub fn debug_string(&self) -> String {
        let machine = self.node.machine();
        format!(
            "{} {} [{}] frame={} waiting_on={} {} delivery_failures={} | {}",
            machine.local_id(),
            machine.role(),
            machine.stage_name(),
            machine.current_frame().0,
            machine.waiting_on(),
            self.stats,
            machine.delivery_failures(),
            self.network_stats()
        )
    }
}
