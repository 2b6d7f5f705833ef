//! Rollout controller — drives the rollout state machine.
//!
//! The controller walks the phases in order and never advances until the
//! current wait phase has converged. Remote errors inside a poll are
//! retried by the poller; remote errors in a one-shot phase abort.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use fleet_converge::{Clock, Observation, PollOutcome, Poller};
use fleet_core::{HealthSnapshot, InstanceId, RolloutConfig, RolloutPlan};
use fleet_gateway::{FleetGateway, GatewayError};

use crate::error::RolloutError;
use crate::phase::RolloutPhase;
use crate::report::RolloutReport;

/// A single capacity-doubling rollout against one group.
pub struct RolloutController {
    group_name: String,
    gateway: Arc<dyn FleetGateway>,
    poller: Poller,
    config: RolloutConfig,
    phase: RolloutPhase,
    history: Vec<RolloutPhase>,
    plan: Option<RolloutPlan>,
}

impl RolloutController {
    /// Create a controller. Nothing is read or written until [`run`](Self::run).
    pub fn new(
        group_name: &str,
        gateway: Arc<dyn FleetGateway>,
        config: RolloutConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let poller = Poller::from_config(&config, clock);
        Self {
            group_name: group_name.to_string(),
            gateway,
            poller,
            config,
            phase: RolloutPhase::Start,
            history: Vec::new(),
            plan: None,
        }
    }

    pub fn phase(&self) -> RolloutPhase {
        self.phase
    }

    /// Phases entered so far, in order.
    pub fn history(&self) -> &[RolloutPhase] {
        &self.history
    }

    /// The plan captured at `Start`, once it has run.
    pub fn plan(&self) -> Option<&RolloutPlan> {
        self.plan.as_ref()
    }

    /// Run the rollout to `Done` or `Aborted`. A controller runs once.
    pub async fn run(&mut self) -> Result<RolloutReport, RolloutError> {
        if self.phase.is_terminal() {
            return Err(RolloutError::Configuration(format!(
                "rollout of {} already finished in {}",
                self.group_name, self.phase
            )));
        }
        let started = self.clock().now();

        match self.run_phases(started).await {
            Ok(report) => {
                self.enter(RolloutPhase::Done);
                info!(
                    group = %report.group,
                    total_secs = report.total_elapsed.as_secs(),
                    effective_secs = report.effective_elapsed.as_secs(),
                    "rollout completed"
                );
                Ok(report)
            }
            Err(e) => {
                let failed = self.phase;
                self.enter(RolloutPhase::Aborted);
                error!(
                    group = %self.group_name,
                    phase = %failed,
                    error = %e,
                    "rollout aborted, fleet left as-is for operator intervention"
                );
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self, started: Instant) -> Result<RolloutReport, RolloutError> {
        self.enter(RolloutPhase::Start);
        let plan = self.capture_plan().await?;
        self.plan = Some(plan.clone());
        info!(
            group = %plan.group_name(),
            from = plan.original_capacity(),
            to = plan.target_capacity(),
            max_attempts_per_wait = self.config.max_attempts(),
            worst_case_secs =
                worst_case_duration(&self.config, plan.load_balancers().len()).as_secs(),
            "rollout planned"
        );

        self.enter(RolloutPhase::ScaleUp);
        self.set_capacity(&plan, plan.target_capacity()).await?;

        self.enter(RolloutPhase::AwaitAsgCapacity);
        self.await_group_size(&plan, plan.target_capacity()).await?;

        self.enter(RolloutPhase::AwaitElbCapacity);
        self.await_elb_capacity(&plan).await?;

        self.enter(RolloutPhase::AwaitElbHealth);
        self.await_elb_health(&plan).await?;
        let effective_elapsed = self.clock().elapsed_since(started);

        self.enter(RolloutPhase::DrainOldInstances);
        let drained = self.drain_old_instances(&plan).await?;

        self.enter(RolloutPhase::ScaleDown);
        self.set_capacity(&plan, plan.original_capacity()).await?;

        self.enter(RolloutPhase::AwaitAsgSettled);
        self.await_group_size(&plan, plan.original_capacity()).await?;
        let retained = self.verify_drained_terminated(&plan, &drained).await?;

        Ok(RolloutReport {
            group: plan.group_name().to_string(),
            region: plan.region().to_string(),
            original_capacity: plan.original_capacity(),
            target_capacity: plan.target_capacity(),
            drained_instances: drained,
            retained_instances: retained,
            total_elapsed: self.clock().elapsed_since(started),
            effective_elapsed,
        })
    }

    fn enter(&mut self, phase: RolloutPhase) {
        debug!(group = %self.group_name, from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
        self.history.push(phase);
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.poller.clock().clone()
    }

    fn remote(&self, source: GatewayError) -> RolloutError {
        RolloutError::Remote {
            phase: self.phase,
            source,
        }
    }

    fn require_converged(&self, outcome: PollOutcome) -> Result<(), RolloutError> {
        match outcome {
            PollOutcome::Converged { attempts, elapsed } => {
                info!(
                    group = %self.group_name,
                    phase = %self.phase,
                    attempts,
                    elapsed_secs = elapsed.as_secs(),
                    "phase converged"
                );
                Ok(())
            }
            PollOutcome::TimedOut {
                last_observed,
                attempts,
                elapsed,
            } => Err(RolloutError::ConvergenceTimeout {
                phase: self.phase,
                last_observed,
                attempts,
                elapsed,
            }),
        }
    }

    // ── Start ──────────────────────────────────────────────────────

    async fn capture_plan(&self) -> Result<RolloutPlan, RolloutError> {
        let group = match self.gateway.get_group(&self.group_name).await {
            Ok(g) => g,
            Err(e) if e.is_not_found() => {
                return Err(RolloutError::Configuration(e.to_string()));
            }
            Err(e) => return Err(self.remote(e)),
        };

        let plan = RolloutPlan::from_group(&group)
            .map_err(|e| RolloutError::Configuration(e.to_string()))?;

        info!(
            group = %plan.group_name(),
            region = %plan.region(),
            instances = ?plan.original_instance_ids(),
            load_balancers = ?plan.load_balancers(),
            "instances before start"
        );
        if plan.original_instance_ids().len() != plan.original_capacity() as usize {
            warn!(
                group = %plan.group_name(),
                live = plan.original_instance_ids().len(),
                desired = plan.original_capacity(),
                "group is not settled at start"
            );
        }

        Ok(plan)
    }

    // ── ScaleUp / ScaleDown ────────────────────────────────────────

    async fn set_capacity(&self, plan: &RolloutPlan, capacity: u32) -> Result<(), RolloutError> {
        info!(
            group = %plan.group_name(),
            phase = %self.phase,
            to = capacity,
            "setting desired capacity"
        );
        self.gateway
            .set_desired_capacity(plan.group_name(), capacity)
            .await
            .map_err(|e| self.remote(e))
    }

    // ── AwaitAsgCapacity / AwaitAsgSettled ─────────────────────────

    /// Poll until the group's own membership holds `expected` instances.
    async fn await_group_size(
        &self,
        plan: &RolloutPlan,
        expected: u32,
    ) -> Result<(), RolloutError> {
        let gateway = &self.gateway;
        let name = plan.group_name();

        let outcome = self
            .poller
            .poll_until(self.phase.as_str(), || async move {
                let group = gateway.get_group(name).await?;
                let live = group.instance_count();
                debug!(group = %name, instances = ?group.instances, "group members");
                Ok::<_, GatewayError>(Observation::when(
                    live == expected as usize,
                    format!(
                        "{live}/{expected} instances in group (desired capacity {})",
                        group.desired_capacity
                    ),
                ))
            })
            .await;

        self.require_converged(outcome)
    }

    // ── AwaitElbCapacity ───────────────────────────────────────────

    async fn await_elb_capacity(&self, plan: &RolloutPlan) -> Result<(), RolloutError> {
        let gateway = &self.gateway;
        let names = plan.load_balancers();
        let expected = plan.target_capacity() as usize;

        let outcome = self
            .poller
            .poll_until(self.phase.as_str(), || async move {
                let views = gateway.list_load_balancers(names).await?;
                let mut converged = views.len() == names.len();
                let mut parts = Vec::with_capacity(names.len());

                for name in names {
                    match views.iter().find(|v| &v.name == name) {
                        Some(view) => {
                            let n = view.instance_count();
                            converged &= n == expected;
                            parts.push(format!("{name}: {n}/{expected} registered"));
                        }
                        None => {
                            converged = false;
                            parts.push(format!("{name}: not reported"));
                        }
                    }
                }

                Ok::<_, GatewayError>(Observation::when(converged, parts.join(", ")))
            })
            .await;

        self.require_converged(outcome)
    }

    // ── AwaitElbHealth ─────────────────────────────────────────────

    async fn await_elb_health(&self, plan: &RolloutPlan) -> Result<(), RolloutError> {
        let gateway = &self.gateway;
        let names = plan.load_balancers();

        let outcome = self
            .poller
            .poll_until(self.phase.as_str(), || async move {
                let views = gateway.list_load_balancers(names).await?;
                let mut snapshot = HealthSnapshot::new();
                let mut missing = Vec::new();

                for name in names {
                    let Some(view) = views.iter().find(|v| &v.name == name) else {
                        missing.push(name.as_str());
                        continue;
                    };
                    for id in &view.instances {
                        let state = gateway.get_instance_health(name, id).await?;
                        debug!(load_balancer = %name, instance = %id, %state, "instance health");
                        snapshot.record(name, id, state);
                    }
                }

                let converged = missing.is_empty() && snapshot.all_in_service();
                let detail = if converged {
                    format!("all in service: {snapshot}")
                } else {
                    let waiting: Vec<String> = missing
                        .iter()
                        .map(|lb| format!("{lb}: not reported"))
                        .chain(
                            snapshot
                                .not_in_service()
                                .iter()
                                .map(|(lb, id, state)| format!("{lb}/{id}={state}")),
                        )
                        .collect();
                    format!("not in service: {}", waiting.join(", "))
                };

                Ok::<_, GatewayError>(Observation::when(converged, detail))
            })
            .await;

        self.require_converged(outcome)
    }

    // ── DrainOldInstances ──────────────────────────────────────────

    /// Deregister exactly the original snapshot from each load balancer,
    /// pausing for the grace period after each one.
    async fn drain_old_instances(
        &self,
        plan: &RolloutPlan,
    ) -> Result<Vec<InstanceId>, RolloutError> {
        let originals = plan.original_instance_ids();
        if originals.is_empty() {
            warn!(group = %plan.group_name(), "no original instances to drain");
            return Ok(Vec::new());
        }

        let clock = self.clock();
        for lb in plan.load_balancers() {
            info!(
                load_balancer = %lb,
                instances = ?originals,
                "deregistering original instances"
            );
            self.gateway
                .deregister_instances(lb, originals)
                .await
                .map_err(|e| self.remote(e))?;

            debug!(
                load_balancer = %lb,
                grace_secs = self.config.drain_grace.as_secs(),
                "waiting for connections to drain"
            );
            clock.sleep(self.config.drain_grace).await;
        }

        Ok(originals.to_vec())
    }

    // ── Drain verification ─────────────────────────────────────────

    /// Check that scale-down removed the drained instances.
    ///
    /// The provider picks which instances to terminate; nothing forces it to
    /// pick the deregistered ones.
    async fn verify_drained_terminated(
        &self,
        plan: &RolloutPlan,
        drained: &[InstanceId],
    ) -> Result<Vec<InstanceId>, RolloutError> {
        let group = match self.gateway.get_group(plan.group_name()).await {
            Ok(g) => g,
            Err(e) if self.config.require_drained_termination => return Err(self.remote(e)),
            Err(e) => {
                warn!(
                    group = %plan.group_name(),
                    error = %e,
                    "could not verify drained instances were terminated"
                );
                return Ok(Vec::new());
            }
        };

        let retained: Vec<InstanceId> = drained
            .iter()
            .filter(|id| group.instances.contains(id))
            .cloned()
            .collect();

        if retained.is_empty() {
            return Ok(retained);
        }

        warn!(
            group = %plan.group_name(),
            retained = ?retained,
            "drained instances are still in the group and no longer behind a load balancer"
        );
        if self.config.require_drained_termination {
            return Err(RolloutError::DrainedInstancesRetained {
                instance_ids: retained,
            });
        }
        Ok(retained)
    }
}

/// Grace period plus one poll budget per wait phase: the longest a
/// successful rollout can take, ignoring remote call latency.
pub fn worst_case_duration(config: &RolloutConfig, load_balancers: usize) -> Duration {
    let waits = RolloutPhase::SEQUENCE.iter().filter(|p| p.is_wait()).count() as u32;
    let load_balancers = u32::try_from(load_balancers).unwrap_or(u32::MAX);
    config
        .poll_budget
        .saturating_add(config.poll_interval)
        .saturating_mul(waits)
        .saturating_add(config.drain_grace.saturating_mul(load_balancers))
}
