//! fleet-gateway — the provider boundary of the rollout.
//!
//! [`FleetGateway`] is a thin request/response surface over the
//! autoscaling group and its load balancers. It holds no logic: every call
//! is one remote read or write, and a successful write says nothing about
//! when the provider will converge.
//!
//! # Implementations
//!
//! - `fleet_aws::AwsFleetGateway` — the real provider (separate crate)
//! - [`memory::SimulatedFleet`] — in-memory fleet that converges over
//!   successive reads, used by tests

pub mod error;
pub mod memory;

use std::future::Future;
use std::pin::Pin;

use fleet_core::{FleetGroup, HealthState, InstanceId, LoadBalancerView};

pub use error::{GatewayError, GatewayResult};
pub use memory::SimulatedFleet;

/// Boxed future alias for gateway calls.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send + 'a>>;

/// Remote operations against one region's autoscaling and load-balancing APIs.
///
/// The region is bound when the gateway is constructed.
pub trait FleetGateway: Send + Sync {
    /// Read the current state of a group. Fails with `NotFound` if absent.
    fn get_group<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, FleetGroup>;

    /// Request a new desired capacity. Fire-and-forget.
    fn set_desired_capacity<'a>(&'a self, name: &'a str, capacity: u32) -> GatewayFuture<'a, ()>;

    /// Read registered membership of the named load balancers.
    fn list_load_balancers<'a>(
        &'a self,
        names: &'a [String],
    ) -> GatewayFuture<'a, Vec<LoadBalancerView>>;

    /// Read the health of one registered instance.
    fn get_instance_health<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, HealthState>;

    /// Deregister instances from a load balancer.
    fn deregister_instances<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: &'a [InstanceId],
    ) -> GatewayFuture<'a, ()>;
}
