//! Node states and the transition function.

use crate::barrier::{Barrier, EmitterBarrier, RepeaterBarrier};
use crate::discovery::PeerSet;
use crate::error::FatalError;
use framelock_types::{NodeId, NodeRole};
use std::fmt;
use std::time::Duration;

/// The node's current phase. Exactly one is active at a time.
#[derive(Debug, Clone)]
pub enum NodeState {
    /// Discovering peers.
    Handshaking { since: Duration },
    /// Running the per-frame barrier.
    Synchronized(Barrier),
    /// Draining outbound traffic before stopping.
    Shutdown { since: Duration },
    /// Terminal.
    FatalError(FatalError),
}

/// A requested state change, applied at the start of the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    PeersDiscovered(PeerSet),
    Shutdown,
    Fatal(FatalError),
}

/// What the transition function needs to know about the node.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    pub local: NodeId,
    pub role: NodeRole,
    pub now: Duration,
}

/// Discriminant of [`NodeState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Handshaking,
    Synchronized,
    Shutdown,
    FatalError,
}

impl StateKind {
    pub fn name(self) -> &'static str {
        match self {
            StateKind::Handshaking => "Handshaking",
            StateKind::Synchronized => "Synchronized",
            StateKind::Shutdown => "Shutdown",
            StateKind::FatalError => "FatalError",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl NodeState {
    pub fn initial(now: Duration) -> Self {
        NodeState::Handshaking { since: now }
    }

    /// Apply a transition.
    ///
    /// `FatalError` absorbs everything. Shutdown can be entered from any
    /// other state and keeps its original start time. Discovered peers only
    /// matter while handshaking.
    pub fn transition(self, transition: Transition, ctx: &TransitionContext) -> NodeState {
        match (self, transition) {
            (state @ NodeState::FatalError(_), _) => state,
            (_, Transition::Fatal(error)) => NodeState::FatalError(error),
            (state @ NodeState::Shutdown { .. }, _) => state,
            (_, Transition::Shutdown) => NodeState::Shutdown { since: ctx.now },
            (NodeState::Handshaking { .. }, Transition::PeersDiscovered(peers)) => {
                NodeState::Synchronized(Self::barrier_for(&peers, ctx))
            }
            (state, Transition::PeersDiscovered(_)) => state,
        }
    }

    fn barrier_for(peers: &PeerSet, ctx: &TransitionContext) -> Barrier {
        // A follower that is its own emitter runs without cluster logic.
        if ctx.role == NodeRole::Emitter || peers.emitter == ctx.local {
            Barrier::Emitter(EmitterBarrier::new(
                peers.repeaters.without(ctx.local),
                ctx.now,
            ))
        } else {
            Barrier::Repeater(RepeaterBarrier::new(peers.emitter))
        }
    }

    pub fn kind(&self) -> StateKind {
        match self {
            NodeState::Handshaking { .. } => StateKind::Handshaking,
            NodeState::Synchronized(_) => StateKind::Synchronized,
            NodeState::Shutdown { .. } => StateKind::Shutdown,
            NodeState::FatalError(_) => StateKind::FatalError,
        }
    }

    /// Whether the host may render the current frame.
    pub fn ready_to_proceed(&self) -> bool {
        match self {
            NodeState::Handshaking { .. } | NodeState::FatalError(_) => false,
            NodeState::Synchronized(barrier) => barrier.is_proceeding(),
            NodeState::Shutdown { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framelock_types::{FrameId, NodeMask};

    fn id(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    fn ctx(role: NodeRole) -> TransitionContext {
        TransitionContext {
            local: id(1),
            role,
            now: Duration::from_secs(2),
        }
    }

    fn peers() -> PeerSet {
        PeerSet {
            emitter: id(0),
            repeaters: NodeMask::from_bits(0b110),
            frame: FrameId::ZERO,
        }
    }

    #[test]
    fn test_handshake_to_synchronized_by_role() {
        let state = NodeState::initial(Duration::ZERO)
            .transition(Transition::PeersDiscovered(peers()), &ctx(NodeRole::Repeater));
        assert!(matches!(state, NodeState::Synchronized(Barrier::Repeater(_))));
        assert!(!state.ready_to_proceed());
    }

    #[test]
    fn test_standalone_leads_itself() {
        let state = NodeState::initial(Duration::ZERO).transition(
            Transition::PeersDiscovered(PeerSet::standalone(id(1))),
            &ctx(NodeRole::Repeater),
        );
        assert!(matches!(state, NodeState::Synchronized(Barrier::Emitter(_))));
    }

    #[test]
    fn test_fatal_is_absorbing() {
        let state = NodeState::initial(Duration::ZERO)
            .transition(Transition::Fatal(FatalError::UnassignedRole), &ctx(NodeRole::Emitter))
            .transition(Transition::Shutdown, &ctx(NodeRole::Emitter))
            .transition(Transition::PeersDiscovered(peers()), &ctx(NodeRole::Emitter));
        assert_eq!(state.kind(), StateKind::FatalError);
        assert!(!state.ready_to_proceed());
    }

    #[test]
    fn test_shutdown_keeps_start_time() {
        let state = NodeState::initial(Duration::ZERO)
            .transition(Transition::Shutdown, &ctx(NodeRole::Emitter));
        let later = TransitionContext {
            now: Duration::from_secs(9),
            ..ctx(NodeRole::Emitter)
        };
        let state = state.transition(Transition::Shutdown, &later);
        assert!(matches!(state, NodeState::Shutdown { since } if since == Duration::from_secs(2)));
        assert!(state.ready_to_proceed());
    }

    #[test]
    fn test_shutdown_can_still_fail() {
        let state = NodeState::Shutdown {
            since: Duration::ZERO,
        }
        .transition(Transition::Fatal(FatalError::UnassignedRole), &ctx(NodeRole::Emitter));
        assert_eq!(state.kind(), StateKind::FatalError);
    }

    #[test]
    fn test_peers_ignored_once_synchronized() {
        let state = NodeState::initial(Duration::ZERO)
            .transition(Transition::PeersDiscovered(peers()), &ctx(NodeRole::Repeater))
            .transition(
                Transition::PeersDiscovered(PeerSet::standalone(id(1))),
                &ctx(NodeRole::Repeater),
            );
        assert!(matches!(state, NodeState::Synchronized(Barrier::Repeater(_))));
    }
}
