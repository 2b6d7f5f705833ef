//! Domain types for the fleet rollout.
//!
//! These mirror what the cloud provider reports about an autoscaling group
//! and its load balancers. Nothing here mutates provider state; the
//! rollout only ever requests mutation through the gateway.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a compute instance (e.g. `i-0abc123`).
pub type InstanceId = String;

// ── Autoscaling group ─────────────────────────────────────────────

/// Snapshot of one autoscaling group as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FleetGroup {
    pub name: String,
    pub region: String,
    pub desired_capacity: u32,
    /// Lower bound configured on the group, if reported.
    pub min_size: Option<u32>,
    /// Upper bound configured on the group, if reported.
    pub max_size: Option<u32>,
    /// Live member instances, in provider order.
    pub instances: Vec<InstanceId>,
    /// Names of the classic load balancers attached to the group.
    pub load_balancers: Vec<String>,
}

impl FleetGroup {
    /// Number of live member instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

// ── Load balancer ─────────────────────────────────────────────────

/// Health of one instance as seen by a load balancer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HealthState {
    InService,
    OutOfService,
    Unknown,
}

impl HealthState {
    /// Parse a provider state string. Anything unrecognised is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "InService" => Self::InService,
            "OutOfService" => Self::OutOfService,
            _ => Self::Unknown,
        }
    }

    pub fn is_in_service(self) -> bool {
        self == Self::InService
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InService => "InService",
            Self::OutOfService => "OutOfService",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Registered membership of one load balancer. Refreshed on every poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancerView {
    pub name: String,
    pub instances: Vec<InstanceId>,
}

impl LoadBalancerView {
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

/// Per-instance health across every associated load balancer.
///
/// Keyed by load balancer name, then instance id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    states: BTreeMap<String, BTreeMap<InstanceId, HealthState>>,
}

impl HealthSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, load_balancer: &str, instance_id: &str, state: HealthState) {
        self.states
            .entry(load_balancer.to_string())
            .or_default()
            .insert(instance_id.to_string(), state);
    }

    /// True when every recorded instance is `InService`.
    pub fn all_in_service(&self) -> bool {
        self.states
            .values()
            .flat_map(|m| m.values())
            .all(|s| s.is_in_service())
    }

    /// Instances that are not yet `InService`, as `(lb, instance, state)`.
    pub fn not_in_service(&self) -> Vec<(&str, &str, HealthState)> {
        self.states
            .iter()
            .flat_map(|(lb, m)| {
                m.iter()
                    .filter(|(_, s)| !s.is_in_service())
                    .map(move |(id, s)| (lb.as_str(), id.as_str(), *s))
            })
            .collect()
    }
}

impl fmt::Display for HealthSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (lb, members) in &self.states {
            for (id, state) in members {
                if !first {
                    f.write_str(", ")?;
                }
                first = false;
                write!(f, "{lb}/{id}={state}")?;
            }
        }
        if first {
            f.write_str("<no registered instances>")?;
        }
        Ok(())
    }
}

// ── Rollout plan ──────────────────────────────────────────────────

/// Why a rollout plan could not be derived from a group.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("group {0} has no load balancers attached")]
    NoLoadBalancers(String),

    #[error("group {0} has desired capacity 0, nothing to roll")]
    ZeroCapacity(String),

    #[error("group {group} cannot double to {target}: max size is {max}")]
    ExceedsMaxSize { group: String, target: u32, max: u32 },

    #[error("group {0} capacity overflows when doubled")]
    Overflow(String),
}

/// The immutable plan captured once at the start of a rollout.
///
/// `original_instance_ids` anchors which instances get drained later,
/// regardless of how membership churns after scale-up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RolloutPlan {
    group_name: String,
    region: String,
    original_capacity: u32,
    target_capacity: u32,
    original_instance_ids: Vec<InstanceId>,
    load_balancers: Vec<String>,
}

impl RolloutPlan {
    /// Derive the plan from the group state read at start.
    pub fn from_group(group: &FleetGroup) -> Result<Self, PlanError> {
        if group.load_balancers.is_empty() {
            return Err(PlanError::NoLoadBalancers(group.name.clone()));
        }
        if group.desired_capacity == 0 {
            return Err(PlanError::ZeroCapacity(group.name.clone()));
        }

        let target = doubled(group.desired_capacity)
            .ok_or_else(|| PlanError::Overflow(group.name.clone()))?;

        if let Some(max) = group.max_size
            && target > max
        {
            return Err(PlanError::ExceedsMaxSize {
                group: group.name.clone(),
                target,
                max,
            });
        }

        Ok(Self {
            group_name: group.name.clone(),
            region: group.region.clone(),
            original_capacity: group.desired_capacity,
            target_capacity: target,
            original_instance_ids: group.instances.clone(),
            load_balancers: group.load_balancers.clone(),
        })
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn original_capacity(&self) -> u32 {
        self.original_capacity
    }

    pub fn target_capacity(&self) -> u32 {
        self.target_capacity
    }

    pub fn original_instance_ids(&self) -> &[InstanceId] {
        &self.original_instance_ids
    }

    pub fn load_balancers(&self) -> &[String] {
        &self.load_balancers
    }
}

/// Target capacity for a doubling rollout.
pub fn doubled(capacity: u32) -> Option<u32> {
    capacity.checked_mul(2)
}
