//! The node state machine.

use crate::barrier::{Barrier, BarrierTiming};
use crate::config::NodeConfig;
use crate::discovery::{
    DiscoveryOutcome, HandshakeConfig, HandshakeDiscovery, PeerDiscovery, StaticDiscovery,
};
use crate::error::FatalError;
use crate::state::{NodeState, StateKind, Transition, TransitionContext};
use bytes::Bytes;
use framelock_core::{Action, Event, OutboundMessage, StateMachine};
use framelock_messages::payload::{AdvanceFrame, ControlPayload, RepeaterReady};
use framelock_messages::{Message, MessageType};
use framelock_types::{FrameId, NodeId, NodeMask, NodeRole};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// A cluster node's role state machine.
///
/// Transitions are never applied mid-event: handlers queue a [`Transition`]
/// and the queue is applied at the start of the next tick.
#[derive(Debug)]
pub struct NodeStateMachine {
    config: NodeConfig,
    state: NodeState,
    /// Transitions requested since the last tick.
    pending: Vec<Transition>,
    discovery: Box<dyn PeerDiscovery>,
    /// Barrier messages that arrived before the handshake finished.
    deferred: Vec<Message>,
    /// Frame the cluster is on.
    frame: FrameId,
    /// When the host last started a new frame.
    last_new_frame_at: Option<Duration>,
    delivery_failures: u64,
    now: Duration,
}

impl NodeStateMachine {
    /// Create a node that discovers peers with `discovery`.
    pub fn new(config: NodeConfig, discovery: Box<dyn PeerDiscovery>) -> Self {
        let state = if config.role == NodeRole::Unassigned {
            NodeState::FatalError(FatalError::UnassignedRole)
        } else {
            NodeState::initial(Duration::ZERO)
        };
        Self {
            config,
            state,
            pending: Vec::new(),
            discovery,
            deferred: Vec::new(),
            frame: FrameId::ZERO,
            last_new_frame_at: None,
            delivery_failures: 0,
            now: Duration::ZERO,
        }
    }

    /// Create a node that runs the hello/welcome handshake for its role.
    pub fn with_handshake(config: NodeConfig, handshake: &HandshakeConfig) -> Self {
        let local = config.local_id;
        let discovery: Box<dyn PeerDiscovery> = match config.role {
            NodeRole::Emitter => Box::new(HandshakeDiscovery::emitter(local, handshake)),
            role => Box::new(HandshakeDiscovery::repeater(local, role, handshake)),
        };
        Self::new(config, discovery)
    }

    /// Create a node that never reached the network.
    pub fn failed(config: NodeConfig, error: FatalError) -> Self {
        let local = config.local_id;
        let mut machine = Self::new(config, Box::new(StaticDiscovery::standalone(local)));
        machine.state = NodeState::FatalError(error);
        machine
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    pub fn local_id(&self) -> NodeId {
        self.config.local_id
    }

    pub fn role(&self) -> NodeRole {
        self.config.role
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn state_kind(&self) -> StateKind {
        self.state.kind()
    }

    pub fn current_frame(&self) -> FrameId {
        self.frame
    }

    /// Whether the host may render the current frame.
    pub fn ready_to_proceed(&self) -> bool {
        self.state.ready_to_proceed()
    }

    pub fn fatal_error(&self) -> Option<&FatalError> {
        match &self.state {
            NodeState::FatalError(error) => Some(error),
            _ => None,
        }
    }

    /// When shutdown started, if it has.
    pub fn shutdown_since(&self) -> Option<Duration> {
        match self.state {
            NodeState::Shutdown { since } => Some(since),
            _ => None,
        }
    }

    /// Nodes the barrier is currently waiting on.
    pub fn waiting_on(&self) -> NodeMask {
        match &self.state {
            NodeState::Synchronized(barrier) => barrier.waiting_on(),
            _ => NodeMask::EMPTY,
        }
    }

    /// Short description of the barrier stage, for diagnostics.
    pub fn stage_name(&self) -> &'static str {
        match &self.state {
            NodeState::Synchronized(barrier) => barrier.stage_name(),
            other => other.kind().name(),
        }
    }

    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Frame State
    // ═══════════════════════════════════════════════════════════════════════

    /// Attach a state blob to the emitter's next go signal. Ignored on
    /// repeaters and before the handshake completes.
    pub fn set_frame_state(&mut self, state: Bytes) {
        match &mut self.state {
            NodeState::Synchronized(Barrier::Emitter(barrier)) => barrier.set_frame_state(state),
            _ => debug!(state = %self.state.kind(), "Frame state ignored"),
        }
    }

    /// Take the state blob that came with the current frame's go signal.
    pub fn take_frame_state(&mut self) -> Option<Bytes> {
        match &mut self.state {
            NodeState::Synchronized(Barrier::Repeater(barrier)) => barrier.take_frame_state(),
            _ => None,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transitions
    // ═══════════════════════════════════════════════════════════════════════

    fn request(&mut self, transition: Transition) {
        self.pending.push(transition);
    }

    fn apply_pending(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.pending.is_empty() {
            return actions;
        }

        let ctx = TransitionContext {
            local: self.config.local_id,
            role: self.config.role,
            now: self.now,
        };
        let before = self.state.kind();
        for transition in std::mem::take(&mut self.pending) {
            if let Transition::PeersDiscovered(peers) = &transition {
                if before == StateKind::Handshaking {
                    self.frame = peers.frame;
                }
            }
            let state = std::mem::replace(&mut self.state, NodeState::initial(self.now));
            self.state = state.transition(transition, &ctx);
        }

        let after = self.state.kind();
        if before == after {
            return actions;
        }
        match &self.state {
            NodeState::FatalError(error) => {
                error!(local = %self.config.local_id, error = %error, "Node entered fatal error")
            }
            _ => info!(
                local = %self.config.local_id,
                from = %before,
                to = %after,
                frame = %self.frame,
                "State change"
            ),
        }

        if after == StateKind::Synchronized {
            for message in std::mem::take(&mut self.deferred) {
                actions.extend(self.on_message(message));
            }
        } else {
            self.deferred.clear();
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event Handlers
    // ═══════════════════════════════════════════════════════════════════════

    fn on_tick(&mut self, new_frame: bool) -> Vec<Action> {
        let mut actions = self.apply_pending();

        if new_frame || self.last_new_frame_at.is_none() {
            self.last_new_frame_at = Some(self.now);
        }
        if let (Some(budget), Some(last)) = (self.config.debug_tick_budget, self.last_new_frame_at)
        {
            let idle = self.now.saturating_sub(last);
            if idle > budget
                && matches!(
                    self.state,
                    NodeState::Handshaking { .. } | NodeState::Synchronized(_)
                )
            {
                warn!(?idle, ?budget, "No new frame within the debug budget, shutting down");
                self.request(Transition::Shutdown);
            }
        }

        let now = self.now;
        let timing = BarrierTiming {
            communication_timeout: self.config.communication_timeout,
            repeater_deadline: self.config.repeater_deadline(),
            evict_late_repeaters: self.config.evict_late_repeaters,
        };
        let transition = match &mut self.state {
            NodeState::Handshaking { .. } => {
                let step = self.discovery.discover_peers(now);
                actions.extend(step.actions);
                match step.outcome {
                    DiscoveryOutcome::Pending => None,
                    DiscoveryOutcome::Complete(peers) => Some(Transition::PeersDiscovered(peers)),
                    DiscoveryOutcome::Failed(error) => Some(Transition::Fatal(error)),
                }
            }
            NodeState::Synchronized(barrier) => match barrier.on_tick(self.frame, now, timing) {
                Ok(barrier_actions) => {
                    actions.extend(barrier_actions);
                    None
                }
                Err(error) => Some(Transition::Fatal(error)),
            },
            NodeState::Shutdown { .. } | NodeState::FatalError(_) => None,
        };
        if let Some(transition) = transition {
            self.request(transition);
        }
        actions
    }

    fn on_message(&mut self, message: Message) -> Vec<Action> {
        let header = message.header;
        let kind = self.state.kind();

        match header.message_type {
            MessageType::GlobalShutdownRequest => {
                if kind != StateKind::FatalError {
                    info!(origin = %header.origin, "Cluster shutdown requested");
                    self.request(Transition::Shutdown);
                }
                return Vec::new();
            }
            MessageType::Data => {
                if kind == StateKind::FatalError {
                    return Vec::new();
                }
                return vec![Action::DeliverAppData(message)];
            }
            MessageType::AckMsgRx => return Vec::new(),
            _ => {}
        }

        let now = self.now;
        let frame = self.frame;
        let result = match &mut self.state {
            NodeState::FatalError(_) | NodeState::Shutdown { .. } => {
                trace!(message_type = %header.message_type, state = %kind, "Ignoring message");
                Ok(Vec::new())
            }
            NodeState::Handshaking { .. } => match header.message_type {
                MessageType::HelloEmitter | MessageType::WelcomeRepeater => {
                    self.discovery.on_message(&message, now)
                }
                _ => {
                    debug!(
                        message_type = %header.message_type,
                        origin = %header.origin,
                        "Deferring barrier message until synchronized"
                    );
                    self.deferred.push(message);
                    Ok(Vec::new())
                }
            },
            NodeState::Synchronized(barrier) => match (header.message_type, barrier) {
                (MessageType::HelloEmitter | MessageType::WelcomeRepeater, _) => {
                    trace!(message_type = %header.message_type, origin = %header.origin, "Handshake already complete");
                    Ok(Vec::new())
                }
                (MessageType::RepeaterReady, Barrier::Emitter(barrier)) => {
                    RepeaterReady::decode(&message.payload)
                        .map_err(|e| FatalError::malformed(header.message_type, header.origin, e))
                        .and_then(|ready| barrier.on_ready(header.origin, ready.frame, frame))
                }
                (MessageType::AdvanceFrame, Barrier::Repeater(barrier)) => {
                    AdvanceFrame::decode(&message.payload)
                        .map_err(|e| FatalError::malformed(header.message_type, header.origin, e))
                        .and_then(|advance| barrier.on_advance(header.origin, advance, frame))
                        .map(|()| Vec::new())
                }
                _ => Err(FatalError::UnexpectedMessage {
                    message_type: header.message_type,
                    origin: header.origin,
                    state: kind.name(),
                }),
            },
        };

        match result {
            Ok(actions) => actions,
            Err(error) => {
                warn!(error = %error, "Protocol violation");
                self.request(Transition::Fatal(error));
                Vec::new()
            }
        }
    }

    fn on_frame_ended(&mut self) -> Vec<Action> {
        match &mut self.state {
            NodeState::Synchronized(barrier) if barrier.is_proceeding() => {
                self.frame = self.frame.next();
                trace!(frame = %self.frame, "Frame ended");
                barrier.end_frame(self.frame, self.now)
            }
            NodeState::Synchronized(_) => {
                warn!(frame = %self.frame, "Frame ended before the barrier cleared");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}

impl StateMachine for NodeStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::Tick { new_frame } => self.on_tick(new_frame),
            Event::MessageReceived(message) => self.on_message(message),
            Event::DeliveryFailed {
                message_type,
                sequence,
                missing,
            } => {
                self.delivery_failures += 1;
                warn!(
                    message_type = %message_type,
                    sequence = %sequence,
                    destinations = %missing,
                    "Delivery failed"
                );
                Vec::new()
            }
            Event::FrameEnded => self.on_frame_ended(),
            Event::ClusterShutdownRequested => {
                if self.state.kind() == StateKind::FatalError {
                    return Vec::new();
                }
                vec![Action::Publish(OutboundMessage::shutdown_request())]
            }
            Event::LocalShutdownRequested => {
                self.request(Transition::Shutdown);
                Vec::new()
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn now(&self) -> Duration {
        self.now
    }
}
