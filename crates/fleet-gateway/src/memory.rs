//! In-memory simulated fleet.
//!
//! Behaves like an eventually consistent provider: capacity changes are
//! accepted immediately but applied one instance per group read, and newly
//! launched instances report `OutOfService` for a number of health reads
//! before turning `InService`. Failures can be injected per operation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use fleet_core::{FleetGroup, HealthState, InstanceId, LoadBalancerView};

use crate::{FleetGateway, GatewayError, GatewayFuture, GatewayResult};

/// Operation names accepted by [`SimulatedFleet::fail_next`].
pub mod ops {
    pub const GET_GROUP: &str = "get_group";
    pub const SET_DESIRED_CAPACITY: &str = "set_desired_capacity";
    pub const LIST_LOAD_BALANCERS: &str = "list_load_balancers";
    pub const GET_INSTANCE_HEALTH: &str = "get_instance_health";
    pub const DEREGISTER_INSTANCES: &str = "deregister_instances";
}

/// Which instances the simulated group removes when shrinking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPolicy {
    OldestFirst,
    NewestFirst,
}

/// Injected failures for one operation: let `skip` calls through, then fail `times`.
#[derive(Debug, Clone, Copy, Default)]
struct FailurePlan {
    skip: u32,
    times: u32,
}

#[derive(Debug, Default)]
struct SimLoadBalancer {
    members: Vec<InstanceId>,
    /// Health reads left before an instance reports `InService`.
    warmup: HashMap<InstanceId, u32>,
}

#[derive(Debug)]
struct SimState {
    group: FleetGroup,
    load_balancers: BTreeMap<String, SimLoadBalancer>,
    next_id: u32,
    warmup_reads: u32,
    policy: TerminationPolicy,
    stuck: HashSet<InstanceId>,
    stuck_on: HashSet<(String, InstanceId)>,
    stalled: HashSet<String>,
    churn: Vec<(u64, InstanceId)>,
    failures: HashMap<&'static str, FailurePlan>,
    capacity_requests: Vec<u32>,
    deregistrations: Vec<(String, Vec<InstanceId>)>,
    group_reads: u64,
}

impl SimState {
    fn take_failure(&mut self, operation: &'static str) -> GatewayResult<()> {
        let Some(plan) = self.failures.get_mut(operation) else {
            return Ok(());
        };
        if plan.skip > 0 {
            plan.skip -= 1;
            return Ok(());
        }
        if plan.times > 0 {
            plan.times -= 1;
            return Err(GatewayError::remote(operation, "injected failure"));
        }
        Ok(())
    }

    /// Move membership one step towards desired capacity.
    fn tick(&mut self) {
        let desired = self.group.desired_capacity as usize;
        let current = self.group.instances.len();

        if current < desired {
            let id = SimulatedFleet::instance_id(self.next_id);
            self.next_id += 1;
            self.group.instances.push(id.clone());
            for (name, lb) in self.load_balancers.iter_mut() {
                if self.stalled.contains(name) {
                    continue;
                }
                lb.members.push(id.clone());
                lb.warmup.insert(id.clone(), self.warmup_reads);
            }
            debug!(instance = %id, "simulated launch");
        } else if current > desired {
            let id = match self.policy {
                TerminationPolicy::OldestFirst => self.group.instances.remove(0),
                TerminationPolicy::NewestFirst => match self.group.instances.pop() {
                    Some(id) => id,
                    None => return,
                },
            };
            self.forget(&id);
            debug!(instance = %id, "simulated termination");
        }
    }

    /// Terminate instances scheduled for the current group read.
    fn churn(&mut self) {
        let read = self.group_reads;
        let due: Vec<InstanceId> = self
            .churn
            .iter()
            .filter(|(at, _)| *at == read)
            .map(|(_, id)| id.clone())
            .collect();
        for id in due {
            self.group.instances.retain(|m| m != &id);
            self.forget(&id);
            debug!(instance = %id, read, "simulated unplanned termination");
        }
    }

    fn forget(&mut self, id: &str) {
        for lb in self.load_balancers.values_mut() {
            lb.members.retain(|m| m != id);
            lb.warmup.remove(id);
        }
    }
}

/// An in-memory autoscaling group with classic load balancers.
#[derive(Debug)]
pub struct SimulatedFleet {
    state: Mutex<SimState>,
}

impl SimulatedFleet {
    /// Create a group at `capacity` with all instances registered and healthy.
    pub fn new(name: &str, region: &str, capacity: u32, load_balancers: &[&str]) -> Self {
        let instances: Vec<InstanceId> = (0..capacity).map(Self::instance_id).collect();

        let load_balancers: BTreeMap<String, SimLoadBalancer> = load_balancers
            .iter()
            .map(|lb| {
                let sim = SimLoadBalancer {
                    members: instances.clone(),
                    warmup: instances.iter().map(|id| (id.clone(), 0)).collect(),
                };
                (lb.to_string(), sim)
            })
            .collect();

        let group = FleetGroup {
            name: name.to_string(),
            region: region.to_string(),
            desired_capacity: capacity,
            min_size: Some(0),
            max_size: None,
            instances,
            load_balancers: load_balancers.keys().cloned().collect(),
        };

        Self {
            state: Mutex::new(SimState {
                group,
                load_balancers,
                next_id: capacity,
                warmup_reads: 2,
                policy: TerminationPolicy::OldestFirst,
                stuck: HashSet::new(),
                stuck_on: HashSet::new(),
                stalled: HashSet::new(),
                churn: Vec::new(),
                failures: HashMap::new(),
                capacity_requests: Vec::new(),
                deregistrations: Vec::new(),
                group_reads: 0,
            }),
        }
    }

    /// Deterministic id of the `n`th instance launched (originals first).
    pub fn instance_id(n: u32) -> InstanceId {
        format!("i-{n:04}")
    }

    /// Health reads a new instance needs before it reports `InService`.
    pub fn with_warmup_reads(self, reads: u32) -> Self {
        self.lock().warmup_reads = reads;
        self
    }

    pub fn with_max_size(self, max: u32) -> Self {
        self.lock().group.max_size = Some(max);
        self
    }

    pub fn with_termination_policy(self, policy: TerminationPolicy) -> Self {
        self.lock().policy = policy;
        self
    }

    /// Keep an instance `OutOfService` forever.
    pub fn stick_instance(&self, instance_id: &str) {
        self.lock().stuck.insert(instance_id.to_string());
    }

    /// Keep an instance `OutOfService` on one load balancer only.
    pub fn stick_instance_on(&self, load_balancer: &str, instance_id: &str) {
        self.lock()
            .stuck_on
            .insert((load_balancer.to_string(), instance_id.to_string()));
    }

    /// Stop registering newly launched instances with `load_balancer`.
    pub fn stall_load_balancer(&self, load_balancer: &str) {
        self.lock().stalled.insert(load_balancer.to_string());
    }

    /// Terminate `instance_id` outside of any capacity change on the
    /// `read`th group read (1-based). The group replaces it as usual.
    pub fn terminate_on_read(&self, read: u64, instance_id: &str) {
        self.lock().churn.push((read, instance_id.to_string()));
    }

    /// Make the next `times` calls of `operation` fail (see [`ops`]).
    pub fn fail_next(&self, operation: &'static str, times: u32) {
        self.fail_after(operation, 0, times);
    }

    /// Let `skip` calls of `operation` succeed, then fail the next `times`.
    pub fn fail_after(&self, operation: &'static str, skip: u32, times: u32) {
        self.lock()
            .failures
            .insert(operation, FailurePlan { skip, times });
    }

    pub fn desired_capacity(&self) -> u32 {
        self.lock().group.desired_capacity
    }

    pub fn instances(&self) -> Vec<InstanceId> {
        self.lock().group.instances.clone()
    }

    pub fn load_balancer_members(&self, load_balancer: &str) -> Vec<InstanceId> {
        self.lock()
            .load_balancers
            .get(load_balancer)
            .map(|lb| lb.members.clone())
            .unwrap_or_default()
    }

    /// Every capacity write received, in order.
    pub fn capacity_requests(&self) -> Vec<u32> {
        self.lock().capacity_requests.clone()
    }

    /// Every deregistration received, as `(load_balancer, instance_ids)`.
    pub fn deregistrations(&self) -> Vec<(String, Vec<InstanceId>)> {
        self.lock().deregistrations.clone()
    }

    pub fn group_reads(&self) -> u64 {
        self.lock().group_reads
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get_group_now(&self, name: &str) -> GatewayResult<FleetGroup> {
        let mut state = self.lock();
        state.take_failure(ops::GET_GROUP)?;
        if state.group.name != name {
            return Err(GatewayError::NotFound(format!("autoscaling group {name}")));
        }
        state.group_reads += 1;
        state.churn();
        state.tick();
        Ok(state.group.clone())
    }

    fn set_desired_capacity_now(&self, name: &str, capacity: u32) -> GatewayResult<()> {
        let mut state = self.lock();
        state.take_failure(ops::SET_DESIRED_CAPACITY)?;
        if state.group.name != name {
            return Err(GatewayError::NotFound(format!("autoscaling group {name}")));
        }
        if let Some(max) = state.group.max_size
            && capacity > max
        {
            return Err(GatewayError::remote(
                ops::SET_DESIRED_CAPACITY,
                format!("new desired capacity {capacity} exceeds max size {max}"),
            ));
        }
        state.capacity_requests.push(capacity);
        state.group.desired_capacity = capacity;
        Ok(())
    }

    fn list_load_balancers_now(&self, names: &[String]) -> GatewayResult<Vec<LoadBalancerView>> {
        let mut state = self.lock();
        state.take_failure(ops::LIST_LOAD_BALANCERS)?;
        names
            .iter()
            .map(|name| {
                state
                    .load_balancers
                    .get(name)
                    .map(|lb| LoadBalancerView {
                        name: name.clone(),
                        instances: lb.members.clone(),
                    })
                    .ok_or_else(|| GatewayError::NotFound(format!("load balancer {name}")))
            })
            .collect()
    }

    fn get_instance_health_now(
        &self,
        load_balancer: &str,
        instance_id: &str,
    ) -> GatewayResult<HealthState> {
        let mut state = self.lock();
        state.take_failure(ops::GET_INSTANCE_HEALTH)?;
        let stuck = state.stuck.contains(instance_id)
            || state
                .stuck_on
                .contains(&(load_balancer.to_string(), instance_id.to_string()));
        let lb = state
            .load_balancers
            .get_mut(load_balancer)
            .ok_or_else(|| GatewayError::NotFound(format!("load balancer {load_balancer}")))?;

        if !lb.members.iter().any(|m| m == instance_id) {
            return Err(GatewayError::remote(
                ops::GET_INSTANCE_HEALTH,
                format!("instance {instance_id} is not registered with {load_balancer}"),
            ));
        }
        if stuck {
            return Ok(HealthState::OutOfService);
        }
        match lb.warmup.get_mut(instance_id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Ok(HealthState::OutOfService)
            }
            Some(_) => Ok(HealthState::InService),
            None => Ok(HealthState::Unknown),
        }
    }

    fn deregister_instances_now(
        &self,
        load_balancer: &str,
        instance_ids: &[InstanceId],
    ) -> GatewayResult<()> {
        let mut state = self.lock();
        state.take_failure(ops::DEREGISTER_INSTANCES)?;
        let lb = state
            .load_balancers
            .get_mut(load_balancer)
            .ok_or_else(|| GatewayError::NotFound(format!("load balancer {load_balancer}")))?;

        lb.members.retain(|m| !instance_ids.contains(m));
        for id in instance_ids {
            lb.warmup.remove(id);
        }
        state
            .deregistrations
            .push((load_balancer.to_string(), instance_ids.to_vec()));
        Ok(())
    }
}

impl FleetGateway for SimulatedFleet {
    fn get_group<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, FleetGroup> {
        Box::pin(async move { self.get_group_now(name) })
    }

    fn set_desired_capacity<'a>(&'a self, name: &'a str, capacity: u32) -> GatewayFuture<'a, ()> {
        Box::pin(async move { self.set_desired_capacity_now(name, capacity) })
    }

    fn list_load_balancers<'a>(
        &'a self,
        names: &'a [String],
    ) -> GatewayFuture<'a, Vec<LoadBalancerView>> {
        Box::pin(async move { self.list_load_balancers_now(names) })
    }

    fn get_instance_health<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, HealthState> {
        Box::pin(async move { self.get_instance_health_now(load_balancer, instance_id) })
    }

    fn deregister_instances<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: &'a [InstanceId],
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move { self.deregister_instances_now(load_balancer, instance_ids) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> SimulatedFleet {
        SimulatedFleet::new("web-asg", "eu-west-1", 2, &["web-elb"])
    }

    #[tokio::test]
    async fn starts_registered_and_healthy() {
        let fleet = fleet();
        let group = fleet.get_group("web-asg").await.unwrap();
        assert_eq!(group.instances, vec!["i-0000", "i-0001"]);
        assert_eq!(group.load_balancers, vec!["web-elb"]);

        for id in &group.instances {
            let health = fleet.get_instance_health("web-elb", id).await.unwrap();
            assert_eq!(health, HealthState::InService);
        }
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let err = fleet().get_group("other").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn scale_up_converges_one_instance_per_read() {
        let fleet = fleet();
        fleet.set_desired_capacity("web-asg", 4).await.unwrap();

        let g = fleet.get_group("web-asg").await.unwrap();
        assert_eq!(g.instance_count(), 3);
        let g = fleet.get_group("web-asg").await.unwrap();
        assert_eq!(g.instance_count(), 4);
        let g = fleet.get_group("web-asg").await.unwrap();
        assert_eq!(g.instance_count(), 4);

        assert_eq!(fleet.load_balancer_members("web-elb").len(), 4);
    }

    #[tokio::test]
    async fn new_instances_warm_up() {
        let fleet = fleet().with_warmup_reads(2);
        fleet.set_desired_capacity("web-asg", 3).await.unwrap();
        fleet.get_group("web-asg").await.unwrap();

        let id = SimulatedFleet::instance_id(2);
        let h1 = fleet.get_instance_health("web-elb", &id).await.unwrap();
        let h2 = fleet.get_instance_health("web-elb", &id).await.unwrap();
        let h3 = fleet.get_instance_health("web-elb", &id).await.unwrap();
        assert_eq!(h1, HealthState::OutOfService);
        assert_eq!(h2, HealthState::OutOfService);
        assert_eq!(h3, HealthState::InService);
    }

    #[tokio::test]
    async fn stuck_instance_never_recovers() {
        let fleet = fleet();
        fleet.stick_instance("i-0000");
        for _ in 0..5 {
            let h = fleet.get_instance_health("web-elb", "i-0000").await.unwrap();
            assert_eq!(h, HealthState::OutOfService);
        }
    }

    #[tokio::test]
    async fn stuck_on_one_load_balancer_only() {
        let fleet = SimulatedFleet::new("web-asg", "eu-west-1", 2, &["elb-a", "elb-b"]);
        fleet.stick_instance_on("elb-b", "i-0001");

        let a = fleet.get_instance_health("elb-a", "i-0001").await.unwrap();
        let b = fleet.get_instance_health("elb-b", "i-0001").await.unwrap();
        assert_eq!(a, HealthState::InService);
        assert_eq!(b, HealthState::OutOfService);
    }

    #[tokio::test]
    async fn stalled_load_balancer_misses_launches() {
        let fleet = SimulatedFleet::new("web-asg", "eu-west-1", 2, &["elb-a", "elb-b"]);
        fleet.stall_load_balancer("elb-b");
        fleet.set_desired_capacity("web-asg", 4).await.unwrap();
        fleet.get_group("web-asg").await.unwrap();
        fleet.get_group("web-asg").await.unwrap();

        assert_eq!(fleet.load_balancer_members("elb-a").len(), 4);
        assert_eq!(fleet.load_balancer_members("elb-b"), vec!["i-0000", "i-0001"]);
    }

    #[tokio::test]
    async fn scheduled_termination_is_replaced() {
        let fleet = fleet();
        fleet.terminate_on_read(2, "i-0000");

        let g = fleet.get_group("web-asg").await.unwrap();
        assert_eq!(g.instances, vec!["i-0000", "i-0001"]);
        let g = fleet.get_group("web-asg").await.unwrap();
        assert_eq!(g.instances, vec!["i-0001", "i-0002"]);
        assert_eq!(fleet.load_balancer_members("web-elb"), vec!["i-0001", "i-0002"]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let fleet = fleet();
        fleet.fail_next(ops::GET_GROUP, 2);
        assert!(fleet.get_group("web-asg").await.is_err());
        assert!(fleet.get_group("web-asg").await.is_err());
        assert!(fleet.get_group("web-asg").await.is_ok());
    }

    #[tokio::test]
    async fn delayed_failure_skips_first_calls() {
        let fleet = fleet();
        fleet.fail_after(ops::SET_DESIRED_CAPACITY, 1, 1);
        assert!(fleet.set_desired_capacity("web-asg", 4).await.is_ok());
        assert!(fleet.set_desired_capacity("web-asg", 2).await.is_err());
        assert!(fleet.set_desired_capacity("web-asg", 2).await.is_ok());
        assert_eq!(fleet.capacity_requests(), vec![4, 2]);
    }

    #[tokio::test]
    async fn scale_down_terminates_oldest_first() {
        let fleet = fleet();
        fleet.set_desired_capacity("web-asg", 4).await.unwrap();
        fleet.get_group("web-asg").await.unwrap();
        fleet.get_group("web-asg").await.unwrap();

        fleet.set_desired_capacity("web-asg", 2).await.unwrap();
        fleet.get_group("web-asg").await.unwrap();
        let g = fleet.get_group("web-asg").await.unwrap();
        assert_eq!(g.instances, vec!["i-0002", "i-0003"]);
    }

    #[tokio::test]
    async fn newest_first_policy_keeps_originals() {
        let fleet = fleet().with_termination_policy(TerminationPolicy::NewestFirst);
        fleet.set_desired_capacity("web-asg", 4).await.unwrap();
        fleet.get_group("web-asg").await.unwrap();
        fleet.get_group("web-asg").await.unwrap();

        fleet.set_desired_capacity("web-asg", 2).await.unwrap();
        fleet.get_group("web-asg").await.unwrap();
        let g = fleet.get_group("web-asg").await.unwrap();
        assert_eq!(g.instances, vec!["i-0000", "i-0001"]);
    }

    #[tokio::test]
    async fn deregistration_removes_membership() {
        let fleet = fleet();
        let ids = vec!["i-0000".to_string()];
        fleet.deregister_instances("web-elb", &ids).await.unwrap();

        assert_eq!(fleet.load_balancer_members("web-elb"), vec!["i-0001"]);
        assert_eq!(fleet.deregistrations(), vec![("web-elb".to_string(), ids)]);
        assert!(fleet.get_instance_health("web-elb", "i-0000").await.is_err());
    }

    #[tokio::test]
    async fn capacity_above_max_is_rejected() {
        let fleet = fleet().with_max_size(3);
        let err = fleet.set_desired_capacity("web-asg", 4).await.unwrap_err();
        assert!(matches!(err, GatewayError::Remote { .. }));
        assert_eq!(fleet.desired_capacity(), 2);
        assert!(fleet.capacity_requests().is_empty());
    }
}
