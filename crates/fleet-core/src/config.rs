//! rollout.toml configuration parser.
//!
//! The file is optional. Every field falls back to the built-in default,
//! and command-line flags are applied on top by the binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors loading a rollout configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
}

/// On-disk shape of `rollout.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RolloutFileConfig {
    pub polling: Option<PollingSection>,
    pub drain: Option<DrainSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PollingSection {
    /// Delay between attempts (e.g. "10s").
    pub interval: Option<String>,
    /// Total time budget per wait step (e.g. "10m").
    pub budget: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DrainSection {
    /// Pause after deregistering from each load balancer (e.g. "10s").
    pub grace: Option<String>,
    /// Fail the rollout if drained instances survive the scale-down.
    pub require_drained_termination: Option<bool>,
}

impl RolloutFileConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Longest interval, budget or grace period accepted.
pub const MAX_STEP_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Resolved timing and policy for one rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutConfig {
    pub poll_interval: Duration,
    pub poll_budget: Duration,
    pub drain_grace: Duration,
    pub require_drained_termination: bool,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            poll_budget: Duration::from_secs(600),
            drain_grace: Duration::from_secs(10),
            require_drained_termination: false,
        }
    }
}

impl RolloutConfig {
    /// Overlay a parsed file onto the defaults.
    pub fn from_file_config(file: &RolloutFileConfig) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(polling) = &file.polling {
            if let Some(s) = &polling.interval {
                cfg.poll_interval = parse_field("polling.interval", s)?;
            }
            if let Some(s) = &polling.budget {
                cfg.poll_budget = parse_field("polling.budget", s)?;
            }
        }

        if let Some(drain) = &file.drain {
            if let Some(s) = &drain.grace {
                cfg.drain_grace = parse_field("drain.grace", s)?;
            }
            if let Some(strict) = drain.require_drained_termination {
                cfg.require_drained_termination = strict;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an optional path; `None` yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file_config(&RolloutFileConfig::from_file(p)?),
            None => Ok(Self::default()),
        }
    }

    /// Reject a zero interval and durations longer than [`MAX_STEP_DURATION`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("polling.interval", self.poll_interval),
            ("polling.budget", self.poll_budget),
            ("drain.grace", self.drain_grace),
        ];
        for (field, value) in fields {
            if value > MAX_STEP_DURATION {
                return Err(ConfigError::Invalid {
                    field,
                    value: format!("{}s", value.as_secs()),
                });
            }
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "polling.interval",
                value: "0s".to_string(),
            });
        }
        Ok(())
    }

    /// Upper bound on poll attempts per wait step.
    pub fn max_attempts(&self) -> u64 {
        let interval = self.poll_interval.as_millis().max(1);
        (self.poll_budget.as_millis().div_ceil(interval)) as u64
    }
}

fn parse_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Invalid {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "10s", "500ms", "10m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
