//! Reasons a rollout aborts.

use std::time::Duration;

use thiserror::Error;

use fleet_core::InstanceId;
use fleet_gateway::GatewayError;

use crate::phase::RolloutPhase;

/// A fatal rollout error. The fleet is left in its current state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RolloutError {
    /// The group is missing or cannot be rolled (checked at `Start`).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A one-shot remote call failed outside of any poll.
    #[error("{phase}: remote call failed: {source}")]
    Remote {
        phase: RolloutPhase,
        source: GatewayError,
    },

    /// A wait phase spent its whole budget without converging.
    #[error("{phase}: no convergence after {attempts} attempts in {elapsed:?}, last observed: {last_observed}")]
    ConvergenceTimeout {
        phase: RolloutPhase,
        last_observed: String,
        attempts: u32,
        elapsed: Duration,
    },

    /// Drained instances survived the scale-down (strict verification only).
    #[error("drained instances still in group after scale-down: {}", instance_ids.join(", "))]
    DrainedInstancesRetained { instance_ids: Vec<InstanceId> },
}

impl RolloutError {
    /// The phase the rollout was in when it failed.
    pub fn phase(&self) -> RolloutPhase {
        match self {
            Self::Configuration(_) => RolloutPhase::Start,
            Self::Remote { phase, .. } | Self::ConvergenceTimeout { phase, .. } => *phase,
            Self::DrainedInstancesRetained { .. } => RolloutPhase::AwaitAsgSettled,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConvergenceTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_phase_and_state() {
        let err = RolloutError::ConvergenceTimeout {
            phase: RolloutPhase::AwaitElbHealth,
            last_observed: "web-elb/i-0003=OutOfService".to_string(),
            attempts: 60,
            elapsed: Duration::from_secs(600),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("AwaitElbHealth:"));
        assert!(msg.contains("i-0003=OutOfService"));
        assert_eq!(err.phase(), RolloutPhase::AwaitElbHealth);
        assert!(err.is_timeout());
    }

    #[test]
    fn remote_error_keeps_source() {
        let err = RolloutError::Remote {
            phase: RolloutPhase::ScaleUp,
            source: GatewayError::remote("set_desired_capacity", "throttled"),
        };
        assert_eq!(
            err.to_string(),
            "ScaleUp: remote call failed: set_desired_capacity failed: throttled"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn retained_lists_instances() {
        let err = RolloutError::DrainedInstancesRetained {
            instance_ids: vec!["i-1".to_string(), "i-2".to_string()],
        };
        assert!(err.to_string().ends_with("i-1, i-2"));
        assert_eq!(err.phase(), RolloutPhase::AwaitAsgSettled);
    }
}
