//! fleet-rollout — the capacity-doubling rollout state machine.
//!
//! Drives an autoscaling group through a fixed, linear sequence:
//!
//! ```text
//! Start → ScaleUp → AwaitAsgCapacity → AwaitElbCapacity → AwaitElbHealth
//!       → DrainOldInstances → ScaleDown → AwaitAsgSettled → Done
//! ```
//!
//! Every `Await*` phase is a bounded poll. A timeout, or a remote failure
//! in a one-shot phase, moves the controller to `Aborted` and leaves the
//! fleet exactly as it is. There is no rollback.
//!
//! # Components
//!
//! - **`phase`** — rollout phases
//! - **`controller`** — the state machine
//! - **`report`** — timing and drain summary of a finished rollout
//! - **`error`** — abort reasons

pub mod controller;
pub mod error;
pub mod phase;
pub mod report;

pub use controller::{RolloutController, worst_case_duration};
pub use error::RolloutError;
pub use phase::RolloutPhase;
pub use report::RolloutReport;
