//! Fixed-width bitset of node ids.

use crate::NodeId;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// A set of nodes, one bit per [`NodeId`].
///
/// This is the destination field of every wire header and the bookkeeping
/// type for pending acknowledgments and barrier readiness. Its width is the
/// reason a cluster is capped at [`crate::MAX_NODES`] members.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeMask(u64);

impl NodeMask {
    /// No nodes.
    pub const EMPTY: Self = NodeMask(0);

    /// Every possible node, including ones not yet known to the session.
    pub const ALL: Self = NodeMask(u64::MAX);

    /// Wrap a raw wire value.
    pub const fn from_bits(bits: u64) -> Self {
        NodeMask(bits)
    }

    /// Get the raw wire value.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// A mask containing exactly one node.
    pub const fn single(node: NodeId) -> Self {
        NodeMask(1 << node.index())
    }

    /// Set a node's bit.
    pub fn set(&mut self, node: NodeId) {
        self.0 |= 1 << node.index();
    }

    /// Clear a node's bit.
    pub fn clear(&mut self, node: NodeId) {
        self.0 &= !(1 << node.index());
    }

    /// Copy of this mask with a node added.
    pub const fn with(self, node: NodeId) -> Self {
        NodeMask(self.0 | (1 << node.index()))
    }

    /// Copy of this mask with a node removed.
    pub const fn without(self, node: NodeId) -> Self {
        NodeMask(self.0 & !(1 << node.index()))
    }

    /// Check if a node is in the set.
    pub const fn contains(self, node: NodeId) -> bool {
        self.0 & (1 << node.index()) != 0
    }

    /// Check if every node of `other` is also in this set.
    pub const fn contains_all(self, other: NodeMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if the set is empty.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of nodes in the set.
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate over member ids in ascending order.
    pub fn iter(self) -> impl Iterator<Item = NodeId> {
        (0..64u8)
            .filter(move |&i| self.0 & (1 << i) != 0)
            .filter_map(NodeId::new)
    }
}

impl FromIterator<NodeId> for NodeMask {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        iter.into_iter().fold(NodeMask::EMPTY, NodeMask::with)
    }
}

impl BitOr for NodeMask {
    type Output = NodeMask;

    fn bitor(self, rhs: NodeMask) -> NodeMask {
        NodeMask(self.0 | rhs.0)
    }
}

impl BitAnd for NodeMask {
    type Output = NodeMask;

    fn bitand(self, rhs: NodeMask) -> NodeMask {
        NodeMask(self.0 & rhs.0)
    }
}

impl Not for NodeMask {
    type Output = NodeMask;

    fn not(self) -> NodeMask {
        NodeMask(!self.0)
    }
}

impl fmt::Debug for NodeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeMask({:#b})", self.0)
    }
}

impl fmt::Display for NodeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == NodeMask::ALL {
            return f.write_str("{*}");
        }
        f.write_str("{")?;
        for (i, node) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", node.get())?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    #[test]
    fn test_mask_basic() {
        let mut mask = NodeMask::EMPTY;
        assert!(mask.is_empty());

        mask.set(id(0));
        mask.set(id(5));
        mask.set(id(63));

        assert!(mask.contains(id(0)));
        assert!(mask.contains(id(5)));
        assert!(mask.contains(id(63)));
        assert!(!mask.contains(id(1)));
        assert_eq!(mask.count(), 3);

        mask.clear(id(5));
        assert!(!mask.contains(id(5)));
        assert_eq!(mask.count(), 2);
    }

    #[test]
    fn test_iter_ascending() {
        let mask: NodeMask = [id(7), id(1), id(4)].into_iter().collect();
        let ids: Vec<u8> = mask.iter().map(NodeId::get).collect();
        assert_eq!(ids, vec![1, 4, 7]);
    }

    #[test]
    fn test_missing_acks_seed() {
        // A sender never waits on itself.
        let all = NodeMask::from_bits(0b111);
        let local = id(0);
        let missing = NodeMask::ALL & all & !local.mask();
        assert_eq!(missing.bits(), 0b110);
    }

    #[test]
    fn test_contains_all() {
        let ready = NodeMask::from_bits(0b1010);
        assert!(ready.contains_all(NodeMask::from_bits(0b1000)));
        assert!(!ready.contains_all(NodeMask::from_bits(0b1001)));
        assert!(ready.contains_all(NodeMask::EMPTY));
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeMask::from_bits(0b1011).to_string(), "{0,1,3}");
        assert_eq!(NodeMask::EMPTY.to_string(), "{}");
        assert_eq!(NodeMask::ALL.to_string(), "{*}");
    }
}
