//! Domain-specific identifier types.

use crate::{NodeMask, MAX_NODES};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier, unique within a session and always in `0..64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct NodeId(u8);

impl NodeId {
    /// The lowest node id.
    pub const ZERO: Self = NodeId(0);

    /// Create a node id, returning `None` if it does not fit in a [`NodeMask`].
    pub const fn new(id: u8) -> Option<Self> {
        if (id as usize) < MAX_NODES {
            Some(NodeId(id))
        } else {
            None
        }
    }

    /// Get the raw value.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Bit index of this node in a [`NodeMask`].
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// A mask containing only this node.
    pub const fn mask(self) -> NodeMask {
        NodeMask::single(self)
    }
}

impl TryFrom<u8> for NodeId {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        NodeId::new(id).ok_or_else(|| format!("node id {id} exceeds the {MAX_NODES}-node limit"))
    }
}

impl From<NodeId> for u8 {
    fn from(id: NodeId) -> u8 {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Frame number the cluster agrees on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FrameId(pub u64);

impl FrameId {
    /// First frame of a session.
    pub const ZERO: Self = FrameId(0);

    /// Get the next frame id.
    pub fn next(self) -> Self {
        FrameId(self.0 + 1)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}

/// Per-origin message sequence number, assigned at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceId(pub u64);

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_range() {
        assert!(NodeId::new(0).is_some());
        assert!(NodeId::new(63).is_some());
        assert!(NodeId::new(64).is_none());
        assert!(NodeId::try_from(200u8).is_err());
    }

    #[test]
    fn test_frame_id_next() {
        assert_eq!(FrameId::ZERO.next(), FrameId(1));
        assert_eq!(FrameId(41).next().to_string(), "Frame(42)");
    }
}
