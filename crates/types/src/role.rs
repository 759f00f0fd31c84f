//! Node roles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Role a node plays for the lifetime of its process.
///
/// Exactly one node per session is the [`NodeRole::Emitter`], which decides
/// when the cluster advances. Repeaters report readiness and wait for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[default]
    Unassigned,
    Emitter,
    Repeater,
    /// Follows the emitter like a repeater.
    Backup,
}

impl NodeRole {
    /// Wire representation used by the handshake.
    pub fn as_u8(self) -> u8 {
        match self {
            NodeRole::Unassigned => 0,
            NodeRole::Emitter => 1,
            NodeRole::Repeater => 2,
            NodeRole::Backup => 3,
        }
    }

    /// Parse the wire representation.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(NodeRole::Unassigned),
            1 => Some(NodeRole::Emitter),
            2 => Some(NodeRole::Repeater),
            3 => Some(NodeRole::Backup),
            _ => None,
        }
    }

    /// Whether this role waits on the emitter's go signal.
    pub fn follows_emitter(self) -> bool {
        matches!(self, NodeRole::Repeater | NodeRole::Backup)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Unassigned => "unassigned",
            NodeRole::Emitter => "emitter",
            NodeRole::Repeater => "repeater",
            NodeRole::Backup => "backup",
        };
        f.write_str(name)
    }
}

/// Error returned when a role name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown node role: {0}")]
pub struct ParseRoleError(String);

impl FromStr for NodeRole {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "emitter" => Ok(NodeRole::Emitter),
            "repeater" => Ok(NodeRole::Repeater),
            "backup" => Ok(NodeRole::Backup),
            "unassigned" => Ok(NodeRole::Unassigned),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}
