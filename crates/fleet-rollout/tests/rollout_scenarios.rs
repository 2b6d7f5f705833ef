//! End-to-end rollout scenarios against the simulated fleet.
//!
//! Drives the public controller API only, with a virtual clock so the
//! ten-minute poll budgets complete instantly.

use std::sync::Arc;
use std::time::Duration;

use fleet_converge::ManualClock;
use fleet_core::RolloutConfig;
use fleet_gateway::memory::{ops, SimulatedFleet};
use fleet_rollout::{RolloutController, RolloutError, RolloutPhase};

const GROUP: &str = "api-asg";
const REGION: &str = "us-east-1";

fn run_setup(
    capacity: u32,
    lbs: &[&str],
) -> (Arc<SimulatedFleet>, Arc<ManualClock>, RolloutController) {
    let fleet = Arc::new(SimulatedFleet::new(GROUP, REGION, capacity, lbs));
    let clock = Arc::new(ManualClock::new());
    let config = RolloutConfig::default();
    let ctl = RolloutController::new(GROUP, fleet.clone(), config, clock.clone());
    (fleet, clock, ctl)
}

#[tokio::test]
async fn capacity_two_single_elb_full_sequence() {
    let (fleet, _clock, mut ctl) = run_setup(2, &["api-elb"]);

    let report = ctl.run().await.unwrap();

    assert_eq!(ctl.history(), RolloutPhase::SEQUENCE);
    assert_eq!(fleet.capacity_requests(), vec![4, 2]);
    assert_eq!(fleet.desired_capacity(), 2);
    assert_eq!(fleet.instances().len(), 2);
    assert_eq!(report.region, REGION);
    assert_eq!(report.drained_instances, vec!["i-0000", "i-0001"]);
}

#[tokio::test]
async fn drain_never_touches_scaled_up_instances() {
    for capacity in 1..=6u32 {
        let (fleet, _clock, mut ctl) = run_setup(capacity, &["api-elb"]);
        ctl.run().await.unwrap();

        let originals: Vec<String> = (0..capacity).map(SimulatedFleet::instance_id).collect();
        let plan = ctl.plan().unwrap();
        assert_eq!(plan.target_capacity(), 2 * capacity);
        assert_eq!(plan.original_instance_ids(), originals.as_slice());

        for (_, ids) in fleet.deregistrations() {
            assert_eq!(ids, originals);
        }
        // The scaled-up half is still registered.
        let members = fleet.load_balancer_members("api-elb");
        assert_eq!(members.len(), capacity as usize);
        assert!(members.iter().all(|m| !originals.contains(m)));
    }
}

#[tokio::test]
async fn health_timeout_leaves_fleet_doubled() {
    let (fleet, clock, mut ctl) = run_setup(2, &["api-elb"]);
    fleet.stick_instance(&SimulatedFleet::instance_id(2));

    let err = ctl.run().await.unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.phase(), RolloutPhase::AwaitElbHealth);
    assert_eq!(ctl.phase(), RolloutPhase::Aborted);
    assert_eq!(
        ctl.history().last(),
        Some(&RolloutPhase::Aborted)
    );
    assert!(!ctl.history().contains(&RolloutPhase::DrainOldInstances));
    assert!(fleet.deregistrations().is_empty());
    assert_eq!(fleet.desired_capacity(), 4);
    // Bounded: asg 10s + one health budget (plus at most one interval).
    assert!(clock.elapsed() < Duration::from_secs(10 + 600 + 10));
}

#[tokio::test]
async fn elb_capacity_timeout_when_load_balancer_unreadable() {
    let (fleet, _clock, mut ctl) = run_setup(2, &["api-elb"]);
    fleet.fail_next(ops::LIST_LOAD_BALANCERS, u32::MAX);

    let err = ctl.run().await.unwrap_err();

    match err {
        RolloutError::ConvergenceTimeout {
            phase,
            last_observed,
            attempts,
            ..
        } => {
            assert_eq!(phase, RolloutPhase::AwaitElbCapacity);
            assert!(last_observed.starts_with("remote error:"));
            assert_eq!(attempts, 60);
        }
        other => panic!("expected ConvergenceTimeout, got {other:?}"),
    }
    assert_eq!(fleet.desired_capacity(), 4);
}

#[tokio::test]
async fn scale_down_failure_aborts_after_drain() {
    let fleet = Arc::new(SimulatedFleet::new(GROUP, REGION, 2, &["api-elb"]));
    let clock = Arc::new(ManualClock::new());
    let config = RolloutConfig {
        poll_interval: Duration::from_secs(5),
        poll_budget: Duration::from_secs(60),
        drain_grace: Duration::from_secs(1),
        require_drained_termination: false,
    };
    let mut ctl = RolloutController::new(GROUP, fleet.clone(), config, clock);

    // Scale up goes through, scale down fails.
    fleet.fail_after(ops::SET_DESIRED_CAPACITY, 1, 1);

    let err = ctl.run().await.unwrap_err();

    assert!(matches!(
        err,
        RolloutError::Remote {
            phase: RolloutPhase::ScaleDown,
            ..
        }
    ));
    assert_eq!(fleet.deregistrations().len(), 1);
    // No retry, no rollback: the doubled capacity stays.
    assert_eq!(fleet.capacity_requests(), vec![4]);
    assert_eq!(fleet.desired_capacity(), 4);
}

#[tokio::test]
async fn custom_timing_shortens_budget() {
    let fleet = Arc::new(SimulatedFleet::new(GROUP, REGION, 2, &["api-elb"]));
    fleet.stick_instance(&SimulatedFleet::instance_id(3));
    let clock = Arc::new(ManualClock::new());
    let config = RolloutConfig {
        poll_interval: Duration::from_secs(2),
        poll_budget: Duration::from_secs(20),
        ..Default::default()
    };
    let mut ctl = RolloutController::new(GROUP, fleet, config, clock);

    match ctl.run().await.unwrap_err() {
        RolloutError::ConvergenceTimeout { attempts, elapsed, .. } => {
            assert_eq!(attempts, 10);
            assert_eq!(elapsed, Duration::from_secs(20));
        }
        other => panic!("expected ConvergenceTimeout, got {other:?}"),
    }
}

#[tokio::test]
async fn one_lagging_load_balancer_blocks_elb_capacity() {
    let (fleet, _clock, mut ctl) = run_setup(2, &["api-elb-a", "api-elb-b"]);
    fleet.stall_load_balancer("api-elb-b");

    match ctl.run().await.unwrap_err() {
        RolloutError::ConvergenceTimeout {
            phase,
            last_observed,
            attempts,
            ..
        } => {
            assert_eq!(phase, RolloutPhase::AwaitElbCapacity);
            assert!(last_observed.contains("api-elb-a: 4/4 registered"));
            assert!(last_observed.contains("api-elb-b: 2/4 registered"));
            assert_eq!(attempts, 60);
        }
        other => panic!("expected ConvergenceTimeout, got {other:?}"),
    }
    assert!(fleet.deregistrations().is_empty());
    assert_eq!(fleet.desired_capacity(), 4);
}

#[tokio::test]
async fn one_unhealthy_load_balancer_blocks_elb_health() {
    let (fleet, _clock, mut ctl) = run_setup(2, &["api-elb-a", "api-elb-b"]);
    fleet.stick_instance_on("api-elb-b", &SimulatedFleet::instance_id(2));

    match ctl.run().await.unwrap_err() {
        RolloutError::ConvergenceTimeout {
            phase,
            last_observed,
            ..
        } => {
            assert_eq!(phase, RolloutPhase::AwaitElbHealth);
            assert_eq!(last_observed, "not in service: api-elb-b/i-0002=OutOfService");
        }
        other => panic!("expected ConvergenceTimeout, got {other:?}"),
    }
    assert!(fleet.deregistrations().is_empty());
    assert_eq!(fleet.desired_capacity(), 4);
}

#[tokio::test]
async fn drain_uses_start_snapshot_despite_churn() {
    let (fleet, _clock, mut ctl) = run_setup(2, &["api-elb"]);
    // First read during AwaitAsgCapacity: the group loses an original and
    // launches a replacement for it.
    fleet.terminate_on_read(2, "i-0000");

    let report = ctl.run().await.unwrap();

    let originals = vec!["i-0000".to_string(), "i-0001".to_string()];
    assert_eq!(ctl.plan().unwrap().original_instance_ids(), originals.as_slice());
    assert_eq!(fleet.deregistrations(), vec![("api-elb".to_string(), originals.clone())]);
    assert_eq!(report.drained_instances, originals);
    assert!(report.retained_instances.is_empty());
    assert_eq!(fleet.instances(), vec!["i-0003", "i-0004"]);
}
