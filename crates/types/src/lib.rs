//! Core types for the framelock cluster.
//!
//! These are shared by the wire codec, the transport and the node state
//! machine. None of them perform I/O.

mod identifiers;
mod node_mask;
mod role;

pub use identifiers::{FrameId, NodeId, SequenceId};
pub use node_mask::NodeMask;
pub use role::{NodeRole, ParseRoleError};

/// Hard ceiling on cluster size.
///
/// Destination sets travel on the wire as a single `u64` bitmask, so a
/// session can never address more than 64 nodes.
pub const MAX_NODES: usize = 64;
