//! Peer discovery: how a node learns who is in the session before the
//! barrier starts.
//!
//! [`HandshakeDiscovery`] runs the hello/welcome exchange over the
//! transport. [`StaticDiscovery`] takes a preconfigured peer set; an empty
//! one skips cluster logic entirely.

use crate::error::FatalError;
use framelock_core::{Action, OutboundMessage};
use framelock_messages::payload::{ControlPayload, RolePublication, Welcome};
use framelock_messages::{Message, MessageType};
use framelock_types::{FrameId, NodeId, NodeMask, NodeRole};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The session as seen by one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSet {
    /// The node that decides when the cluster advances.
    pub emitter: NodeId,
    /// Nodes the emitter waits on. Only the emitter knows the full set.
    pub repeaters: NodeMask,
    /// Frame the session starts on.
    pub frame: FrameId,
}

impl PeerSet {
    /// A session of one: the node leads itself and never waits.
    pub fn standalone(local: NodeId) -> Self {
        Self {
            emitter: local,
            repeaters: NodeMask::EMPTY,
            frame: FrameId::ZERO,
        }
    }

    /// Every node in the set.
    pub fn members(&self) -> NodeMask {
        self.repeaters.with(self.emitter)
    }
}

/// Whether discovery has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Pending,
    Complete(PeerSet),
    Failed(FatalError),
}

/// Result of one discovery step.
#[derive(Debug)]
pub struct DiscoveryStep {
    pub actions: Vec<Action>,
    pub outcome: DiscoveryOutcome,
}

impl DiscoveryStep {
    fn pending(actions: Vec<Action>) -> Self {
        Self {
            actions,
            outcome: DiscoveryOutcome::Pending,
        }
    }

    fn outcome(outcome: DiscoveryOutcome) -> Self {
        Self {
            actions: Vec::new(),
            outcome,
        }
    }
}

/// Pluggable peer discovery, driven by the node while `Handshaking`.
pub trait PeerDiscovery: Send + fmt::Debug {
    /// Called once per tick. Completes with the peer set once known.
    fn discover_peers(&mut self, now: Duration) -> DiscoveryStep;

    /// Called for every handshake message received while discovering.
    fn on_message(&mut self, _message: &Message, _now: Duration) -> Result<Vec<Action>, FatalError> {
        Ok(Vec::new())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Static Discovery
// ═══════════════════════════════════════════════════════════════════════════

/// Discovery from configuration.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    local: NodeId,
    peers: PeerSet,
}

impl StaticDiscovery {
    pub fn new(local: NodeId, peers: PeerSet) -> Self {
        Self { local, peers }
    }

    /// Skip cluster logic: the node is its own emitter with no repeaters.
    pub fn standalone(local: NodeId) -> Self {
        Self::new(local, PeerSet::standalone(local))
    }
}

impl PeerDiscovery for StaticDiscovery {
    fn discover_peers(&mut self, _now: Duration) -> DiscoveryStep {
        let actions = self
            .peers
            .members()
            .without(self.local)
            .iter()
            .map(Action::RegisterNode)
            .collect();
        DiscoveryStep {
            actions,
            outcome: DiscoveryOutcome::Complete(self.peers),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Handshake Discovery
// ═══════════════════════════════════════════════════════════════════════════

/// Handshake timing.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Repeaters the emitter waits for before starting.
    pub expected_repeaters: usize,
    /// How long the handshake may take.
    pub handshake_timeout: Duration,
    /// How often a repeater repeats its hello.
    pub hello_interval: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            expected_repeaters: 0,
            handshake_timeout: Duration::from_secs(30),
            hello_interval: Duration::from_secs(1),
        }
    }
}

impl HandshakeConfig {
    pub fn with_expected_repeaters(mut self, count: usize) -> Self {
        self.expected_repeaters = count;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_hello_interval(mut self, interval: Duration) -> Self {
        self.hello_interval = interval;
        self
    }
}

#[derive(Debug)]
enum HandshakeSide {
    Emitter {
        expected: usize,
        found: NodeMask,
    },
    Repeater {
        role: NodeRole,
        hello_interval: Duration,
        last_hello: Option<Duration>,
        welcomed: Option<(NodeId, FrameId)>,
    },
}

/// Hello/welcome exchange.
///
/// Repeaters shout a `HelloEmitter` every `hello_interval` until an emitter
/// answers with a `WelcomeRepeater` addressed to them. The emitter registers
/// and welcomes every repeater it hears from, and starts once the expected
/// count is reached or the handshake times out with at least one repeater.
#[derive(Debug)]
pub struct HandshakeDiscovery {
    local: NodeId,
    timeout: Duration,
    started: Option<Duration>,
    side: HandshakeSide,
}

impl HandshakeDiscovery {
    pub fn emitter(local: NodeId, config: &HandshakeConfig) -> Self {
        Self {
            local,
            timeout: config.handshake_timeout,
            started: None,
            side: HandshakeSide::Emitter {
                expected: config.expected_repeaters,
                found: NodeMask::EMPTY,
            },
        }
    }

    pub fn repeater(local: NodeId, role: NodeRole, config: &HandshakeConfig) -> Self {
        Self {
            local,
            timeout: config.handshake_timeout,
            started: None,
            side: HandshakeSide::Repeater {
                role,
                hello_interval: config.hello_interval,
                last_hello: None,
                welcomed: None,
            },
        }
    }

    fn elapsed(&mut self, now: Duration) -> Duration {
        let started = *self.started.get_or_insert(now);
        now.saturating_sub(started)
    }
}

impl PeerDiscovery for HandshakeDiscovery {
    fn discover_peers(&mut self, now: Duration) -> DiscoveryStep {
        let elapsed = self.elapsed(now);
        let local = self.local;
        let timeout = self.timeout;

        match &mut self.side {
            HandshakeSide::Emitter { expected, found } => {
                let peers = PeerSet {
                    emitter: local,
                    repeaters: *found,
                    frame: FrameId::ZERO,
                };
                if found.count() >= *expected {
                    info!(repeaters = %found, "All repeaters registered");
                    return DiscoveryStep::outcome(DiscoveryOutcome::Complete(peers));
                }
                if elapsed >= timeout {
                    if found.is_empty() {
                        return DiscoveryStep::outcome(DiscoveryOutcome::Failed(
                            FatalError::NoRepeaters(timeout),
                        ));
                    }
                    warn!(
                        expected = *expected,
                        found = found.count(),
                        repeaters = %found,
                        "Handshake timed out, continuing with the repeaters found"
                    );
                    return DiscoveryStep::outcome(DiscoveryOutcome::Complete(peers));
                }
                DiscoveryStep::pending(Vec::new())
            }
            HandshakeSide::Repeater {
                role,
                hello_interval,
                last_hello,
                welcomed,
            } => {
                if let Some((emitter, frame)) = *welcomed {
                    return DiscoveryStep::outcome(DiscoveryOutcome::Complete(PeerSet {
                        emitter,
                        repeaters: NodeMask::EMPTY,
                        frame,
                    }));
                }
                if elapsed >= timeout {
                    return DiscoveryStep::outcome(DiscoveryOutcome::Failed(
                        FatalError::HandshakeTimeout(timeout),
                    ));
                }
                let due = last_hello.map_or(true, |at| now.saturating_sub(at) >= *hello_interval);
                if !due {
                    return DiscoveryStep::pending(Vec::new());
                }
                *last_hello = Some(now);
                debug!(local = %local, "Looking for emitter");
                DiscoveryStep::pending(vec![Action::Publish(OutboundMessage::hello(*role))])
            }
        }
    }

    fn on_message(&mut self, message: &Message, _now: Duration) -> Result<Vec<Action>, FatalError> {
        let header = message.header;
        match (&mut self.side, header.message_type) {
            (HandshakeSide::Emitter { found, .. }, MessageType::HelloEmitter) => {
                let hello = RolePublication::decode(&message.payload).map_err(|e| {
                    FatalError::malformed(header.message_type, header.origin, e)
                })?;
                if !hello.role.follows_emitter() {
                    warn!(origin = %header.origin, role = %hello.role, "Ignoring hello from non-repeater");
                    return Ok(Vec::new());
                }
                if found.contains(header.origin) {
                    // The welcome is reliable; the repeater will get it.
                    return Ok(Vec::new());
                }
                found.set(header.origin);
                info!(repeater = %header.origin, role = %hello.role, "Repeater registered");
                Ok(vec![
                    Action::RegisterNode(header.origin),
                    Action::Publish(OutboundMessage::welcome(header.origin, FrameId::ZERO)),
                ])
            }
            (HandshakeSide::Repeater { welcomed, .. }, MessageType::WelcomeRepeater) => {
                if welcomed.is_some() || !header.destinations.contains(self.local) {
                    return Ok(Vec::new());
                }
                let welcome = Welcome::decode(&message.payload).map_err(|e| {
                    FatalError::malformed(header.message_type, header.origin, e)
                })?;
                *welcomed = Some((header.origin, welcome.frame));
                info!(emitter = %header.origin, frame = %welcome.frame, "Welcomed by emitter");
                Ok(vec![Action::RegisterNode(header.origin)])
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use framelock_messages::{MessageFlags, MessageHeader};
    use framelock_types::SequenceId;

    fn id(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    fn received(outbound: OutboundMessage, origin: u8, to: NodeMask) -> Message {
        let mut header = outbound.header();
        header.origin = id(origin);
        header.sequence = SequenceId(1);
        if header.destinations.is_empty() || header.destinations == NodeMask::ALL {
            header.destinations = to;
        }
        Message::new(header, outbound.payload).unwrap()
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_emitter_completes_when_all_repeaters_hello() {
        let config = HandshakeConfig::default().with_expected_repeaters(2);
        let mut emitter = HandshakeDiscovery::emitter(id(0), &config);
        assert_eq!(emitter.discover_peers(secs(0)).outcome, DiscoveryOutcome::Pending);

        let hello = OutboundMessage::hello(NodeRole::Repeater);
        let actions = emitter
            .on_message(&received(hello.clone(), 1, NodeMask::ALL), secs(1))
            .unwrap();
        assert!(matches!(actions[0], Action::RegisterNode(n) if n == id(1)));
        assert!(matches!(&actions[1], Action::Publish(m) if m.message_type == MessageType::WelcomeRepeater));

        // A repeated hello is not welcomed twice.
        assert!(emitter
            .on_message(&received(hello.clone(), 1, NodeMask::ALL), secs(2))
            .unwrap()
            .is_empty());
        assert_eq!(emitter.discover_peers(secs(2)).outcome, DiscoveryOutcome::Pending);

        emitter
            .on_message(&received(hello, 2, NodeMask::ALL), secs(3))
            .unwrap();
        assert_eq!(
            emitter.discover_peers(secs(3)).outcome,
            DiscoveryOutcome::Complete(PeerSet {
                emitter: id(0),
                repeaters: NodeMask::from_bits(0b110),
                frame: FrameId::ZERO,
            })
        );
    }

    #[test]
    fn test_emitter_timeout_keeps_found_repeaters() {
        let config = HandshakeConfig::default()
            .with_expected_repeaters(3)
            .with_handshake_timeout(secs(10));
        let mut emitter = HandshakeDiscovery::emitter(id(0), &config);
        emitter.discover_peers(secs(0));
        emitter
            .on_message(
                &received(OutboundMessage::hello(NodeRole::Repeater), 2, NodeMask::ALL),
                secs(1),
            )
            .unwrap();

        match emitter.discover_peers(secs(10)).outcome {
            DiscoveryOutcome::Complete(peers) => assert_eq!(peers.repeaters, id(2).mask()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_emitter_without_repeaters_fails() {
        let config = HandshakeConfig::default()
            .with_expected_repeaters(1)
            .with_handshake_timeout(secs(5));
        let mut emitter = HandshakeDiscovery::emitter(id(0), &config);
        emitter.discover_peers(secs(0));
        assert_eq!(
            emitter.discover_peers(secs(5)).outcome,
            DiscoveryOutcome::Failed(FatalError::NoRepeaters(secs(5)))
        );
    }

    #[test]
    fn test_repeater_hellos_at_interval() {
        let config = HandshakeConfig::default();
        let mut repeater = HandshakeDiscovery::repeater(id(1), NodeRole::Repeater, &config);

        assert_eq!(repeater.discover_peers(Duration::ZERO).actions.len(), 1);
        assert!(repeater
            .discover_peers(Duration::from_millis(500))
            .actions
            .is_empty());
        assert_eq!(repeater.discover_peers(secs(1)).actions.len(), 1);
    }

    #[test]
    fn test_repeater_completes_on_welcome() {
        let config = HandshakeConfig::default();
        let mut repeater = HandshakeDiscovery::repeater(id(1), NodeRole::Repeater, &config);
        repeater.discover_peers(Duration::ZERO);

        // A welcome for someone else is not ours.
        let other = received(OutboundMessage::welcome(id(2), FrameId(4)), 0, id(2).mask());
        assert!(repeater.on_message(&other, secs(1)).unwrap().is_empty());

        let ours = received(OutboundMessage::welcome(id(1), FrameId(4)), 0, id(1).mask());
        let actions = repeater.on_message(&ours, secs(1)).unwrap();
        assert!(matches!(actions[..], [Action::RegisterNode(n)] if n == id(0)));

        assert_eq!(
            repeater.discover_peers(secs(1)).outcome,
            DiscoveryOutcome::Complete(PeerSet {
                emitter: id(0),
                repeaters: NodeMask::EMPTY,
                frame: FrameId(4),
            })
        );
    }

    #[test]
    fn test_repeater_times_out() {
        let config = HandshakeConfig::default().with_handshake_timeout(secs(3));
        let mut repeater = HandshakeDiscovery::repeater(id(1), NodeRole::Repeater, &config);
        repeater.discover_peers(secs(0));
        assert_eq!(
            repeater.discover_peers(secs(3)).outcome,
            DiscoveryOutcome::Failed(FatalError::HandshakeTimeout(secs(3)))
        );
    }

    #[test]
    fn test_malformed_hello_is_fatal() {
        let config = HandshakeConfig::default().with_expected_repeaters(1);
        let mut emitter = HandshakeDiscovery::emitter(id(0), &config);
        let mut header = MessageHeader::new(
            MessageType::HelloEmitter,
            NodeMask::ALL,
            MessageFlags::BROADCAST | MessageFlags::DOES_NOT_REQUIRE_ACK,
        );
        header.origin = id(1);
        let message = Message::new(header, Bytes::new()).unwrap();
        assert!(matches!(
            emitter.on_message(&message, secs(0)),
            Err(FatalError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_static_registers_members() {
        let peers = PeerSet {
            emitter: id(0),
            repeaters: NodeMask::from_bits(0b110),
            frame: FrameId::ZERO,
        };
        let step = StaticDiscovery::new(id(1), peers).discover_peers(Duration::ZERO);
        let registered: Vec<NodeId> = step
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::RegisterNode(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(registered, vec![id(0), id(2)]);
        assert_eq!(step.outcome, DiscoveryOutcome::Complete(peers));
    }
}
