//! fleet-core — shared types for the capacity-doubling rollout.
//!
//! Holds the provider-facing data model (`FleetGroup`, `LoadBalancerView`,
//! `HealthState`), the immutable `RolloutPlan` captured before any capacity
//! change, and the `rollout.toml` configuration layer.

pub mod config;
pub mod types;

pub use config::{ConfigError, MAX_STEP_DURATION, RolloutConfig, RolloutFileConfig};
pub use types::*;
