//! Per-frame barrier for each role.
//!
//! Frame N on the emitter:
//!
//! ```text
//! AwaitingReadiness ── RepeaterReady{N} from every repeater ──► publish AdvanceFrame{N}
//!        ▲                                                         │
//!        └──────────────── end_frame (N+1) ◄──── Proceeding ◄──────┘
//! ```
//!
//! Frame N on a repeater:
//!
//! ```text
//! SignalReady ── publish RepeaterReady{N} ──► AwaitingAdvance ── AdvanceFrame{N} ──► Proceeding
//!      ▲                                                                                 │
//!      └──────────────────────────────── end_frame (N+1) ◄──────────────────────────────┘
//! ```

use crate::error::FatalError;
use bytes::Bytes;
use framelock_core::{Action, OutboundMessage};
use framelock_messages::payload::AdvanceFrame;
use framelock_messages::MessageType;
use framelock_types::{FrameId, NodeId, NodeMask};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Barrier timing shared by both roles.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BarrierTiming {
    /// Emitter readiness deadline.
    pub communication_timeout: Duration,
    /// Repeater go-signal deadline, always later than the emitter's.
    pub repeater_deadline: Duration,
    pub evict_late_repeaters: bool,
}

/// The barrier a synchronized node runs.
#[derive(Debug, Clone)]
pub enum Barrier {
    Emitter(EmitterBarrier),
    Repeater(RepeaterBarrier),
}

impl Barrier {
    /// Whether the host may render the current frame.
    pub fn is_proceeding(&self) -> bool {
        match self {
            Barrier::Emitter(b) => b.stage == EmitterStage::Proceeding,
            Barrier::Repeater(b) => b.stage == RepeaterStage::Proceeding,
        }
    }

    /// Nodes this node is currently waiting on.
    pub fn waiting_on(&self) -> NodeMask {
        match self {
            Barrier::Emitter(b) => b.waiting_on(),
            Barrier::Repeater(b) => match b.stage {
                RepeaterStage::Proceeding => NodeMask::EMPTY,
                _ => b.emitter.mask(),
            },
        }
    }

    /// Short name of the current stage.
    pub fn stage_name(&self) -> &'static str {
        match self {
            Barrier::Emitter(b) => match b.stage {
                EmitterStage::AwaitingReadiness { .. } => "AwaitingReadiness",
                EmitterStage::Proceeding => "Proceeding",
            },
            Barrier::Repeater(b) => match b.stage {
                RepeaterStage::SignalReady => "SignalReady",
                RepeaterStage::AwaitingAdvance { .. } => "AwaitingAdvance",
                RepeaterStage::Proceeding => "Proceeding",
            },
        }
    }

    pub(crate) fn on_tick(
        &mut self,
        frame: FrameId,
        now: Duration,
        timing: BarrierTiming,
    ) -> Result<Vec<Action>, FatalError> {
        match self {
            Barrier::Emitter(b) => Ok(b.on_tick(frame, now, timing)),
            Barrier::Repeater(b) => b.on_tick(frame, now, timing),
        }
    }

    pub(crate) fn end_frame(&mut self, frame: FrameId, now: Duration) -> Vec<Action> {
        match self {
            Barrier::Emitter(b) => b.end_frame(frame, now),
            Barrier::Repeater(b) => b.end_frame(frame, now),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Emitter
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterStage {
    /// Collecting `RepeaterReady` for the current frame.
    AwaitingReadiness { since: Duration },
    /// `AdvanceFrame` sent; the host is rendering.
    Proceeding,
}

/// The emitter's side of the barrier.
#[derive(Debug, Clone)]
pub struct EmitterBarrier {
    /// Repeaters that must be ready before the frame advances.
    repeaters: NodeMask,
    /// Repeaters ready for the current frame.
    ready: NodeMask,
    /// Repeaters already ready for the next frame.
    early: NodeMask,
    stage: EmitterStage,
    /// State blob attached to the next `AdvanceFrame`.
    frame_state: Bytes,
}

impl EmitterBarrier {
    pub fn new(repeaters: NodeMask, now: Duration) -> Self {
        Self {
            repeaters,
            ready: NodeMask::EMPTY,
            early: NodeMask::EMPTY,
            stage: EmitterStage::AwaitingReadiness { since: now },
            frame_state: Bytes::new(),
        }
    }

    pub fn stage(&self) -> EmitterStage {
        self.stage
    }

    pub fn repeaters(&self) -> NodeMask {
        self.repeaters
    }

    /// Repeaters not yet ready for the current frame.
    pub fn waiting_on(&self) -> NodeMask {
        match self.stage {
            EmitterStage::AwaitingReadiness { .. } => self.repeaters & !self.ready,
            EmitterStage::Proceeding => NodeMask::EMPTY,
        }
    }

    pub fn set_frame_state(&mut self, state: Bytes) {
        self.frame_state = state;
    }

    /// Record a repeater's readiness for `ready_frame`.
    pub fn on_ready(
        &mut self,
        from: NodeId,
        ready_frame: FrameId,
        frame: FrameId,
    ) -> Result<Vec<Action>, FatalError> {
        if !self.repeaters.contains(from) {
            warn!(from = %from, frame = %ready_frame, "Readiness from unknown repeater");
            return Ok(Vec::new());
        }
        if ready_frame < frame {
            trace!(from = %from, frame = %ready_frame, current = %frame, "Stale readiness");
            return Ok(Vec::new());
        }

        match self.stage {
            EmitterStage::AwaitingReadiness { .. } if ready_frame == frame => {
                self.ready.set(from);
                debug!(from = %from, frame = %frame, waiting_on = %self.waiting_on(), "Repeater ready");
                Ok(self.try_advance(frame))
            }
            EmitterStage::Proceeding if ready_frame == frame => Ok(Vec::new()),
            EmitterStage::Proceeding if ready_frame == frame.next() => {
                self.early.set(from);
                Ok(Vec::new())
            }
            _ => Err(FatalError::FrameMismatch {
                origin: from,
                expected: frame,
                received: ready_frame,
            }),
        }
    }

    fn on_tick(&mut self, frame: FrameId, now: Duration, timing: BarrierTiming) -> Vec<Action> {
        let EmitterStage::AwaitingReadiness { since } = self.stage else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        let late = self.waiting_on();
        if timing.evict_late_repeaters
            && !late.is_empty()
            && now.saturating_sub(since) >= timing.communication_timeout
        {
            warn!(frame = %frame, late = %late, "Evicting repeaters that missed the readiness deadline");
            actions.extend(late.iter().map(Action::UnregisterNode));
            self.repeaters = self.repeaters & !late;
        }
        actions.extend(self.try_advance(frame));
        actions
    }

    fn try_advance(&mut self, frame: FrameId) -> Vec<Action> {
        if !matches!(self.stage, EmitterStage::AwaitingReadiness { .. })
            || !self.ready.contains_all(self.repeaters)
        {
            return Vec::new();
        }

        self.stage = EmitterStage::Proceeding;
        let state = std::mem::take(&mut self.frame_state);
        if self.repeaters.is_empty() {
            return Vec::new();
        }
        debug!(frame = %frame, repeaters = %self.repeaters, "Advancing cluster");
        vec![Action::Publish(OutboundMessage::advance_frame(frame, state))]
    }

    fn end_frame(&mut self, next: FrameId, now: Duration) -> Vec<Action> {
        self.ready = std::mem::take(&mut self.early) & self.repeaters;
        self.stage = EmitterStage::AwaitingReadiness { since: now };
        self.try_advance(next)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Repeater
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeaterStage {
    /// Readiness for the current frame not yet sent.
    SignalReady,
    /// Waiting for the emitter's `AdvanceFrame`.
    AwaitingAdvance { since: Duration },
    /// Go signal received; the host is rendering.
    Proceeding,
}

/// A repeater's side of the barrier.
#[derive(Debug, Clone)]
pub struct RepeaterBarrier {
    emitter: NodeId,
    stage: RepeaterStage,
    /// State blob from the current frame's `AdvanceFrame`.
    frame_state: Option<Bytes>,
}

impl RepeaterBarrier {
    pub fn new(emitter: NodeId) -> Self {
        Self {
            emitter,
            stage: RepeaterStage::SignalReady,
            frame_state: None,
        }
    }

    pub fn emitter(&self) -> NodeId {
        self.emitter
    }

    pub fn stage(&self) -> RepeaterStage {
        self.stage
    }

    pub fn take_frame_state(&mut self) -> Option<Bytes> {
        self.frame_state.take()
    }

    /// Apply the emitter's go signal.
    pub fn on_advance(
        &mut self,
        from: NodeId,
        advance: AdvanceFrame,
        frame: FrameId,
    ) -> Result<(), FatalError> {
        if from != self.emitter {
            return Err(FatalError::UnexpectedMessage {
                message_type: MessageType::AdvanceFrame,
                origin: from,
                state: "Synchronized",
            });
        }
        if advance.frame < frame || self.stage == RepeaterStage::Proceeding {
            trace!(frame = %advance.frame, current = %frame, "Ignoring repeated go signal");
            return Ok(());
        }
        if advance.frame > frame {
            return Err(FatalError::FrameMismatch {
                origin: from,
                expected: frame,
                received: advance.frame,
            });
        }

        self.frame_state = (!advance.state.is_empty()).then_some(advance.state);
        self.stage = RepeaterStage::Proceeding;
        debug!(frame = %frame, "Go signal received");
        Ok(())
    }

    fn on_tick(
        &mut self,
        frame: FrameId,
        now: Duration,
        timing: BarrierTiming,
    ) -> Result<Vec<Action>, FatalError> {
        match self.stage {
            RepeaterStage::SignalReady => Ok(self.signal_ready(frame, now)),
            RepeaterStage::AwaitingAdvance { since } => {
                let waited = now.saturating_sub(since);
                if waited >= timing.repeater_deadline {
                    info!(frame = %frame, emitter = %self.emitter, "No go signal from emitter");
                    return Err(FatalError::EmitterSilent { frame, waited });
                }
                Ok(Vec::new())
            }
            RepeaterStage::Proceeding => Ok(Vec::new()),
        }
    }

    fn signal_ready(&mut self, frame: FrameId, now: Duration) -> Vec<Action> {
        self.stage = RepeaterStage::AwaitingAdvance { since: now };
        debug!(frame = %frame, emitter = %self.emitter, "Signaling readiness");
        vec![Action::Publish(OutboundMessage::repeater_ready(
            self.emitter,
            frame,
        ))]
    }

    fn end_frame(&mut self, next: FrameId, now: Duration) -> Vec<Action> {
        self.frame_state = None;
        self.signal_ready(next, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    fn timing() -> BarrierTiming {
        BarrierTiming {
            communication_timeout: Duration::from_secs(5),
            repeater_deadline: Duration::from_secs(6),
            evict_late_repeaters: false,
        }
    }

    fn published_types(actions: &[Action]) -> Vec<MessageType> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Publish(m) => Some(m.message_type),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_emitter_advances_only_when_all_ready() {
        let frame = FrameId(0);
        let mut barrier = EmitterBarrier::new(NodeMask::from_bits(0b110), Duration::ZERO);

        assert!(barrier.on_ready(id(1), frame, frame).unwrap().is_empty());
        assert_eq!(barrier.waiting_on(), id(2).mask());
        assert!(barrier.on_tick(frame, Duration::from_secs(60), timing()).is_empty());

        let actions = barrier.on_ready(id(2), frame, frame).unwrap();
        assert_eq!(published_types(&actions), vec![MessageType::AdvanceFrame]);
        assert_eq!(barrier.stage(), EmitterStage::Proceeding);
    }

    #[test]
    fn test_emitter_keeps_early_readiness() {
        let mut barrier = EmitterBarrier::new(id(1).mask(), Duration::ZERO);
        barrier.on_ready(id(1), FrameId(0), FrameId(0)).unwrap();
        assert_eq!(barrier.stage(), EmitterStage::Proceeding);

        // Repeater finished frame 0 before the emitter did.
        assert!(barrier.on_ready(id(1), FrameId(1), FrameId(0)).unwrap().is_empty());

        let actions = barrier.end_frame(FrameId(1), Duration::from_secs(1));
        assert_eq!(published_types(&actions), vec![MessageType::AdvanceFrame]);
    }

    #[test]
    fn test_emitter_rejects_future_readiness() {
        let mut barrier = EmitterBarrier::new(id(1).mask(), Duration::ZERO);
        assert_eq!(
            barrier.on_ready(id(1), FrameId(3), FrameId(1)).unwrap_err(),
            FatalError::FrameMismatch {
                origin: id(1),
                expected: FrameId(1),
                received: FrameId(3),
            }
        );
    }

    #[test]
    fn test_emitter_ignores_stale_and_unknown() {
        let mut barrier = EmitterBarrier::new(id(1).mask(), Duration::ZERO);
        assert!(barrier.on_ready(id(1), FrameId(0), FrameId(2)).unwrap().is_empty());
        assert!(barrier.on_ready(id(5), FrameId(2), FrameId(2)).unwrap().is_empty());
        assert_eq!(barrier.waiting_on(), id(1).mask());
    }

    #[test]
    fn test_emitter_evicts_late_repeaters_when_enabled() {
        let timing = BarrierTiming {
            evict_late_repeaters: true,
            ..timing()
        };
        let mut barrier = EmitterBarrier::new(NodeMask::from_bits(0b110), Duration::ZERO);
        barrier.on_ready(id(1), FrameId(0), FrameId(0)).unwrap();

        assert!(barrier
            .on_tick(FrameId(0), Duration::from_secs(4), timing)
            .is_empty());

        let actions = barrier.on_tick(FrameId(0), Duration::from_secs(5), timing);
        assert!(matches!(actions[0], Action::UnregisterNode(n) if n == id(2)));
        assert_eq!(published_types(&actions), vec![MessageType::AdvanceFrame]);
        assert_eq!(barrier.repeaters(), id(1).mask());
    }

    #[test]
    fn test_emitter_without_repeaters_proceeds_silently() {
        let mut barrier = EmitterBarrier::new(NodeMask::EMPTY, Duration::ZERO);
        assert!(barrier.on_tick(FrameId(0), Duration::ZERO, timing()).is_empty());
        assert_eq!(barrier.stage(), EmitterStage::Proceeding);
    }

    #[test]
    fn test_repeater_signals_then_proceeds() {
        let mut barrier = RepeaterBarrier::new(id(0));
        let actions = barrier.on_tick(FrameId(0), Duration::ZERO, timing()).unwrap();
        assert_eq!(published_types(&actions), vec![MessageType::RepeaterReady]);

        // Readiness is sent once per frame.
        assert!(barrier
            .on_tick(FrameId(0), Duration::from_millis(10), timing())
            .unwrap()
            .is_empty());

        let advance = AdvanceFrame {
            frame: FrameId(0),
            state: Bytes::from_static(b"clock"),
        };
        barrier.on_advance(id(0), advance, FrameId(0)).unwrap();
        assert_eq!(barrier.stage(), RepeaterStage::Proceeding);
        assert_eq!(barrier.take_frame_state(), Some(Bytes::from_static(b"clock")));
    }

    #[test]
    fn test_repeater_rejects_future_go() {
        let mut barrier = RepeaterBarrier::new(id(0));
        barrier.on_tick(FrameId(2), Duration::ZERO, timing()).unwrap();
        let advance = AdvanceFrame {
            frame: FrameId(3),
            state: Bytes::new(),
        };
        assert!(matches!(
            barrier.on_advance(id(0), advance, FrameId(2)),
            Err(FatalError::FrameMismatch { .. })
        ));
    }

    #[test]
    fn test_repeater_fails_when_emitter_silent() {
        let mut barrier = RepeaterBarrier::new(id(0));
        barrier.on_tick(FrameId(0), Duration::ZERO, timing()).unwrap();
        // Past the emitter's eviction deadline the repeater keeps waiting.
        assert_eq!(
            barrier.on_tick(FrameId(0), Duration::from_secs(5), timing()),
            Ok(Vec::new())
        );
        assert_eq!(
            barrier.on_tick(FrameId(0), Duration::from_secs(6), timing()),
            Err(FatalError::EmitterSilent {
                frame: FrameId(0),
                waited: Duration::from_secs(6),
            })
        );
    }

    #[test]
    fn test_eviction_frees_repeater_before_its_deadline() {
        let timing = BarrierTiming {
            evict_late_repeaters: true,
            ..timing()
        };
        let mut emitter = EmitterBarrier::new(NodeMask::from_bits(0b110), Duration::ZERO);
        let mut healthy = RepeaterBarrier::new(id(0));

        healthy.on_tick(FrameId(0), Duration::ZERO, timing).unwrap();
        emitter.on_ready(id(1), FrameId(0), FrameId(0)).unwrap();

        let actions = emitter.on_tick(FrameId(0), timing.communication_timeout, timing);
        assert_eq!(published_types(&actions), vec![MessageType::AdvanceFrame]);

        // The go signal lands while the healthy repeater is still waiting.
        assert!(healthy
            .on_tick(FrameId(0), timing.communication_timeout, timing)
            .is_ok());
        let advance = AdvanceFrame {
            frame: FrameId(0),
            state: Bytes::new(),
        };
        healthy.on_advance(id(0), advance, FrameId(0)).unwrap();
        assert_eq!(healthy.stage(), RepeaterStage::Proceeding);
    }
}
