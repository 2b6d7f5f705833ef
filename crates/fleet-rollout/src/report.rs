//! Summary of a finished rollout. Observational only.

use std::time::Duration;

use serde::{Serialize, Serializer};

use fleet_core::InstanceId;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RolloutReport {
    pub group: String,
    pub region: String,
    pub original_capacity: u32,
    pub target_capacity: u32,
    /// Instances deregistered from the load balancers.
    pub drained_instances: Vec<InstanceId>,
    /// Drained instances the group kept after scaling down.
    pub retained_instances: Vec<InstanceId>,
    /// Start to `Done`.
    #[serde(rename = "total_elapsed_secs", serialize_with = "as_secs")]
    pub total_elapsed: Duration,
    /// Start until every instance was `InService`.
    #[serde(rename = "effective_elapsed_secs", serialize_with = "as_secs")]
    pub effective_elapsed: Duration,
}

impl RolloutReport {
    /// One-line summary for the operator.
    pub fn summary(&self) -> String {
        format!(
            "deploy of {} done in {}s (effective: {}s)",
            self.group,
            self.total_elapsed.as_secs(),
            self.effective_elapsed.as_secs()
        )
    }
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RolloutReport {
        RolloutReport {
            group: "web-asg".to_string(),
            region: "eu-west-1".to_string(),
            original_capacity: 2,
            target_capacity: 4,
            drained_instances: vec!["i-0000".to_string(), "i-0001".to_string()],
            retained_instances: vec![],
            total_elapsed: Duration::from_secs(312),
            effective_elapsed: Duration::from_millis(241_900),
        }
    }

    #[test]
    fn summary_line() {
        assert_eq!(
            report().summary(),
            "deploy of web-asg done in 312s (effective: 241s)"
        );
    }

    #[test]
    fn json_uses_whole_seconds() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["total_elapsed_secs"], 312);
        assert_eq!(json["effective_elapsed_secs"], 241);
        assert_eq!(json["drained_instances"][1], "i-0001");
    }
}
