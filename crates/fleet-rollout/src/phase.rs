//! Rollout phases.

use std::fmt;

/// Current phase of a rollout. Each phase is entered at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RolloutPhase {
    /// Read the group and capture the plan.
    Start,
    /// Request doubled desired capacity.
    ScaleUp,
    /// Wait for the group to hold the doubled instance count.
    AwaitAsgCapacity,
    /// Wait for every load balancer to register the doubled count.
    AwaitElbCapacity,
    /// Wait for every registered instance to be `InService`.
    AwaitElbHealth,
    /// Deregister the original instances from each load balancer.
    DrainOldInstances,
    /// Request the original desired capacity.
    ScaleDown,
    /// Wait for the group to shrink back to the original count.
    AwaitAsgSettled,
    /// Completed successfully.
    Done,
    /// Stopped on a fatal error. The fleet is left as it was.
    Aborted,
}

impl RolloutPhase {
    /// The success path, in order.
    pub const SEQUENCE: [RolloutPhase; 9] = [
        Self::Start,
        Self::ScaleUp,
        Self::AwaitAsgCapacity,
        Self::AwaitElbCapacity,
        Self::AwaitElbHealth,
        Self::DrainOldInstances,
        Self::ScaleDown,
        Self::AwaitAsgSettled,
        Self::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::ScaleUp => "ScaleUp",
            Self::AwaitAsgCapacity => "AwaitAsgCapacity",
            Self::AwaitElbCapacity => "AwaitElbCapacity",
            Self::AwaitElbHealth => "AwaitElbHealth",
            Self::DrainOldInstances => "DrainOldInstances",
            Self::ScaleDown => "ScaleDown",
            Self::AwaitAsgSettled => "AwaitAsgSettled",
            Self::Done => "Done",
            Self::Aborted => "Aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Whether this phase is a bounded poll.
    pub fn is_wait(self) -> bool {
        matches!(
            self,
            Self::AwaitAsgCapacity
                | Self::AwaitElbCapacity
                | Self::AwaitElbHealth
                | Self::AwaitAsgSettled
        )
    }
}

impl fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_linear_and_ends_done() {
        assert_eq!(RolloutPhase::SEQUENCE[0], RolloutPhase::Start);
        assert_eq!(RolloutPhase::SEQUENCE[8], RolloutPhase::Done);
        assert!(!RolloutPhase::SEQUENCE.contains(&RolloutPhase::Aborted));
    }

    #[test]
    fn wait_phases() {
        let waits: Vec<_> = RolloutPhase::SEQUENCE
            .iter()
            .filter(|p| p.is_wait())
            .collect();
        assert_eq!(waits.len(), 4);
        assert!(!RolloutPhase::ScaleUp.is_wait());
        assert!(RolloutPhase::Aborted.is_terminal());
    }

    #[test]
    fn display_matches_name() {
        assert_eq!(RolloutPhase::AwaitElbHealth.to_string(), "AwaitElbHealth");
    }
}
