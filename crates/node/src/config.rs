//! Node configuration.

use framelock_types::{NodeId, NodeRole};
use std::time::Duration;

/// Configuration for a [`crate::NodeStateMachine`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's id.
    pub local_id: NodeId,
    /// Role for the lifetime of the process.
    pub role: NodeRole,
    /// How long the emitter waits for readiness before evicting late
    /// repeaters.
    pub communication_timeout: Duration,
    /// Extra time a repeater waits for the go signal on top of
    /// `communication_timeout`, so that the emitter evicts a stalled peer
    /// before a healthy repeater gives up on the emitter.
    pub repeater_grace: Duration,
    /// Let the emitter unregister repeaters that miss the readiness
    /// deadline. When disabled the barrier blocks on a stalled repeater and
    /// the other repeaters fail with `EmitterSilent` once their own deadline
    /// passes.
    pub evict_late_repeaters: bool,
    /// Shut down when no new host frame starts within this budget.
    pub debug_tick_budget: Option<Duration>,
    /// Longest a shutting-down node waits for outstanding acknowledgments.
    pub shutdown_drain_timeout: Duration,
}

impl NodeConfig {
    pub fn new(local_id: NodeId, role: NodeRole) -> Self {
        Self {
            local_id,
            role,
            communication_timeout: Duration::from_secs(5),
            repeater_grace: Duration::from_secs(1),
            evict_late_repeaters: true,
            debug_tick_budget: None,
            shutdown_drain_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_communication_timeout(mut self, timeout: Duration) -> Self {
        self.communication_timeout = timeout;
        self
    }

    pub fn with_repeater_grace(mut self, grace: Duration) -> Self {
        self.repeater_grace = grace;
        self
    }

    /// Longest a repeater waits for the go signal of a frame.
    pub fn repeater_deadline(&self) -> Duration {
        self.communication_timeout + self.repeater_grace
    }

    pub fn with_evict_late_repeaters(mut self, enabled: bool) -> Self {
        self.evict_late_repeaters = enabled;
        self
    }

    pub fn with_debug_tick_budget(mut self, budget: Option<Duration>) -> Self {
        self.debug_tick_budget = budget;
        self
    }

    pub fn with_shutdown_drain_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_drain_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeater_outlasts_eviction_deadline() {
        let config = NodeConfig::new(NodeId::new(1).unwrap(), NodeRole::Repeater);
        assert!(config.evict_late_repeaters);
        assert_eq!(config.repeater_deadline(), Duration::from_secs(6));
        assert!(config.repeater_deadline() > config.communication_timeout);

        let config = config
            .with_communication_timeout(Duration::from_millis(500))
            .with_repeater_grace(Duration::from_millis(250));
        assert_eq!(config.repeater_deadline(), Duration::from_millis(750));
    }
}
