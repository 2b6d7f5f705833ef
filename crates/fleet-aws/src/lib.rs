//! fleet-aws — [`FleetGateway`] over the AWS SDK.
//!
//! Autoscaling groups are read and resized through the Auto Scaling API;
//! membership, health and deregistration go through the Classic Load
//! Balancing API. Both clients share one SDK config bound to a region.

use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_autoscaling::error::DisplayErrorContext;
use aws_sdk_elasticloadbalancing::types::Instance as ElbInstance;
use tracing::debug;

use fleet_core::{FleetGroup, HealthState, InstanceId, LoadBalancerView};
use fleet_gateway::{FleetGateway, GatewayError, GatewayFuture, GatewayResult};

const DESCRIBE_GROUPS: &str = "DescribeAutoScalingGroups";
const SET_CAPACITY: &str = "SetDesiredCapacity";
const DESCRIBE_LOAD_BALANCERS: &str = "DescribeLoadBalancers";
const DESCRIBE_HEALTH: &str = "DescribeInstanceHealth";
const DEREGISTER: &str = "DeregisterInstancesFromLoadBalancer";

/// Gateway for one AWS region.
#[derive(Clone)]
pub struct AwsFleetGateway {
    region: String,
    autoscaling: aws_sdk_autoscaling::Client,
    elb: aws_sdk_elasticloadbalancing::Client,
}

impl std::fmt::Debug for AwsFleetGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsFleetGateway")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl AwsFleetGateway {
    /// Resolve credentials from the default chain and bind both clients to `region`.
    pub async fn connect(region: &str) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        debug!(region, "aws clients configured");

        Self {
            region: region.to_string(),
            autoscaling: aws_sdk_autoscaling::Client::new(&sdk_config),
            elb: aws_sdk_elasticloadbalancing::Client::new(&sdk_config),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn describe_group(&self, name: &str) -> GatewayResult<FleetGroup> {
        let output = self
            .autoscaling
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .send()
            .await
            .map_err(|e| remote(DESCRIBE_GROUPS, e))?;

        let Some(group) = output.auto_scaling_groups().first() else {
            return Err(GatewayError::NotFound(format!(
                "autoscaling group {name} in {}",
                self.region
            )));
        };

        let instances = group
            .instances()
            .iter()
            .filter_map(|i| i.instance_id().map(str::to_string))
            .collect();

        Ok(FleetGroup {
            name: name.to_string(),
            region: self.region.clone(),
            desired_capacity: capacity("DesiredCapacity", group.desired_capacity())?,
            min_size: optional_capacity("MinSize", group.min_size())?,
            max_size: optional_capacity("MaxSize", group.max_size())?,
            instances,
            load_balancers: group.load_balancer_names().to_vec(),
        })
    }

    async fn update_capacity(&self, name: &str, capacity: u32) -> GatewayResult<()> {
        let desired = i32::try_from(capacity).map_err(|_| {
            GatewayError::remote(SET_CAPACITY, format!("capacity {capacity} out of range"))
        })?;

        self.autoscaling
            .set_desired_capacity()
            .auto_scaling_group_name(name)
            .desired_capacity(desired)
            .send()
            .await
            .map_err(|e| remote(SET_CAPACITY, e))?;

        debug!(group = name, capacity, "desired capacity requested");
        Ok(())
    }

    async fn describe_load_balancers(
        &self,
        names: &[String],
    ) -> GatewayResult<Vec<LoadBalancerView>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let output = self
            .elb
            .describe_load_balancers()
            .set_load_balancer_names(Some(names.to_vec()))
            .send()
            .await
            .map_err(|e| remote(DESCRIBE_LOAD_BALANCERS, e))?;

        output
            .load_balancer_descriptions()
            .iter()
            .map(|lb| {
                let name = lb.load_balancer_name().ok_or_else(|| {
                    GatewayError::InvalidResponse("load balancer without a name".to_string())
                })?;
                Ok(LoadBalancerView {
                    name: name.to_string(),
                    instances: lb
                        .instances()
                        .iter()
                        .filter_map(|i| i.instance_id().map(str::to_string))
                        .collect(),
                })
            })
            .collect()
    }

    async fn describe_health(
        &self,
        load_balancer: &str,
        instance_id: &str,
    ) -> GatewayResult<HealthState> {
        let output = self
            .elb
            .describe_instance_health()
            .load_balancer_name(load_balancer)
            .instances(ElbInstance::builder().instance_id(instance_id).build())
            .send()
            .await
            .map_err(|e| remote(DESCRIBE_HEALTH, e))?;

        Ok(output
            .instance_states()
            .first()
            .map(|s| health_state(s.state()))
            .unwrap_or(HealthState::Unknown))
    }

    async fn deregister(
        &self,
        load_balancer: &str,
        instance_ids: &[InstanceId],
    ) -> GatewayResult<()> {
        let instances = instance_ids
            .iter()
            .map(|id| ElbInstance::builder().instance_id(id).build())
            .collect();

        self.elb
            .deregister_instances_from_load_balancer()
            .load_balancer_name(load_balancer)
            .set_instances(Some(instances))
            .send()
            .await
            .map_err(|e| remote(DEREGISTER, e))?;

        debug!(load_balancer, count = instance_ids.len(), "instances deregistered");
        Ok(())
    }
}

impl FleetGateway for AwsFleetGateway {
    fn get_group<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, FleetGroup> {
        Box::pin(self.describe_group(name))
    }

    fn set_desired_capacity<'a>(&'a self, name: &'a str, capacity: u32) -> GatewayFuture<'a, ()> {
        Box::pin(self.update_capacity(name, capacity))
    }

    fn list_load_balancers<'a>(
        &'a self,
        names: &'a [String],
    ) -> GatewayFuture<'a, Vec<LoadBalancerView>> {
        Box::pin(self.describe_load_balancers(names))
    }

    fn get_instance_health<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, HealthState> {
        Box::pin(self.describe_health(load_balancer, instance_id))
    }

    fn deregister_instances<'a>(
        &'a self,
        load_balancer: &'a str,
        instance_ids: &'a [InstanceId],
    ) -> GatewayFuture<'a, ()> {
        Box::pin(self.deregister(load_balancer, instance_ids))
    }
}

// ── Conversions ───────────────────────────────────────────────────

fn remote<E: std::error::Error>(operation: &'static str, err: E) -> GatewayError {
    GatewayError::remote(operation, DisplayErrorContext(err).to_string())
}

fn capacity(field: &str, value: Option<i32>) -> GatewayResult<u32> {
    match optional_capacity(field, value)? {
        Some(v) => Ok(v),
        None => Err(GatewayError::InvalidResponse(format!("group is missing {field}"))),
    }
}

fn optional_capacity(field: &str, value: Option<i32>) -> GatewayResult<Option<u32>> {
    value
        .map(|v| {
            u32::try_from(v)
                .map_err(|_| GatewayError::InvalidResponse(format!("negative {field}: {v}")))
        })
        .transpose()
}

fn health_state(state: Option<&str>) -> HealthState {
    state.map(HealthState::parse).unwrap_or(HealthState::Unknown)
}
