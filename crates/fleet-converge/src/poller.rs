//! Convergence poller.
//!
//! Runs a condition against live provider state until it holds or the
//! time budget is spent. A remote error while evaluating is treated as
//! "not converged yet" and retried on the next interval.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use fleet_core::RolloutConfig;

use crate::clock::Clock;

/// Result of one condition evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub converged: bool,
    /// Human-readable description of what was observed.
    pub detail: String,
}

impl Observation {
    pub fn converged(detail: impl Into<String>) -> Self {
        Self {
            converged: true,
            detail: detail.into(),
        }
    }

    pub fn pending(detail: impl Into<String>) -> Self {
        Self {
            converged: false,
            detail: detail.into(),
        }
    }

    pub fn when(converged: bool, detail: impl Into<String>) -> Self {
        Self {
            converged,
            detail: detail.into(),
        }
    }
}

/// How a poll step resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Converged {
        attempts: u32,
        elapsed: Duration,
    },
    TimedOut {
        /// Detail of the last evaluation (or its error).
        last_observed: String,
        attempts: u32,
        elapsed: Duration,
    },
}

impl PollOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Converged { attempts, .. } | Self::TimedOut { attempts, .. } => *attempts,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Converged { elapsed, .. } | Self::TimedOut { elapsed, .. } => *elapsed,
        }
    }
}

/// Fixed-interval poller with a wall-clock budget.
#[derive(Clone)]
pub struct Poller {
    interval: Duration,
    budget: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("interval", &self.interval)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl Poller {
    pub fn new(interval: Duration, budget: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            budget,
            clock,
        }
    }

    /// Build from resolved rollout configuration.
    pub fn from_config(config: &RolloutConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.poll_interval, config.poll_budget, clock)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Evaluate `condition` until it converges or the budget is spent.
    ///
    /// Returns as soon as an evaluation converges, without a further sleep.
    /// On timeout the total time spent is at least the budget and less than
    /// budget + interval + one evaluation.
    pub async fn poll_until<F, Fut, E>(&self, step: &str, mut condition: F) -> PollOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation, E>>,
        E: fmt::Display,
    {
        let start = self.clock.now();
        let mut attempts: u32 = 0;
        let mut last_observed = String::from("nothing observed");

        loop {
            attempts += 1;

            match condition().await {
                Ok(obs) if obs.converged => {
                    let elapsed = self.clock.elapsed_since(start);
                    debug!(
                        step,
                        attempts,
                        elapsed_secs = elapsed.as_secs(),
                        detail = %obs.detail,
                        "converged"
                    );
                    return PollOutcome::Converged { attempts, elapsed };
                }
                Ok(obs) => {
                    info!(step, attempt = attempts, detail = %obs.detail, "not converged yet");
                    last_observed = obs.detail;
                }
                Err(e) => {
                    warn!(
                        step,
                        attempt = attempts,
                        error = %e,
                        "remote error while polling, retrying"
                    );
                    last_observed = format!("remote error: {e}");
                }
            }

            self.clock.sleep(self.interval).await;

            let elapsed = self.clock.elapsed_since(start);
            if elapsed >= self.budget {
                warn!(
                    step,
                    attempts,
                    elapsed_secs = elapsed.as_secs(),
                    budget_secs = self.budget.as_secs(),
                    last_observed = %last_observed,
                    "gave up waiting for convergence"
                );
                return PollOutcome::TimedOut {
                    last_observed,
                    attempts,
                    elapsed,
                };
            }
        }
    }
}
