//! asg-double — replace every instance of an autoscaling group by doubling it.
//!
//! Doubles the desired capacity, waits for the new instances to come up
//! healthy behind every attached load balancer, deregisters the original
//! instances and scales back down so the group drops them.
//!
//! # Usage
//!
//! ```text
//! asg-double --autoscaling-group web-asg --region eu-west-1
//! asg-double -g web-asg -r eu-west-1 --config rollout.toml --output json
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;

use fleet_aws::AwsFleetGateway;
use fleet_converge::TokioClock;
use fleet_core::RolloutConfig;
use fleet_rollout::RolloutController;

#[derive(Parser, Debug)]
#[command(
    name = "asg-double",
    about = "Roll every instance of an autoscaling group by doubling its capacity",
    version
)]
struct Cli {
    /// Name of the autoscaling group to roll.
    #[arg(short = 'g', long, visible_alias = "asg")]
    autoscaling_group: String,

    /// Region the group lives in.
    #[arg(short, long)]
    region: String,

    /// Optional rollout.toml with [polling] and [drain] sections.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds between convergence checks.
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Seconds each wait phase may take before aborting.
    #[arg(long)]
    poll_budget: Option<u64>,

    /// Seconds to wait after deregistering, per load balancer.
    #[arg(long)]
    drain_grace: Option<u64>,

    /// Fail if drained instances are still in the group after scale-down.
    #[arg(long)]
    require_drained_termination: bool,

    /// Format of the final report.
    #[arg(long, value_enum, default_value_t = Format::Text)]
    output: Format,

    /// Format of log lines on stderr.
    #[arg(long, value_enum, default_value_t = Format::Text)]
    log_format: Format,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl Cli {
    /// Defaults, then the config file, then flags.
    fn rollout_config(&self) -> anyhow::Result<RolloutConfig> {
        let mut cfg =
            RolloutConfig::load(self.config.as_deref()).with_context(|| match &self.config {
                Some(path) => format!("loading {}", path.display()),
                None => "loading defaults".to_string(),
            })?;

        if let Some(secs) = self.poll_interval {
            cfg.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.poll_budget {
            cfg.poll_budget = Duration::from_secs(secs);
        }
        if let Some(secs) = self.drain_grace {
            cfg.drain_grace = Duration::from_secs(secs);
        }
        if self.require_drained_termination {
            cfg.require_drained_termination = true;
        }
        cfg.validate().context("invalid timing flags")?;
        Ok(cfg)
    }
}

fn init_tracing(format: Format) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| {
        tracing_subscriber::EnvFilter::try_new("info,fleetctl=debug,fleet_rollout=debug")
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        Format::Text => builder.init(),
        Format::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = cli.rollout_config()?;
    info!(
        group = %cli.autoscaling_group,
        region = %cli.region,
        poll_interval_secs = config.poll_interval.as_secs(),
        poll_budget_secs = config.poll_budget.as_secs(),
        drain_grace_secs = config.drain_grace.as_secs(),
        "asg-double starting"
    );

    let gateway = Arc::new(AwsFleetGateway::connect(&cli.region).await);
    info!(region = gateway.region(), "aws gateway ready");
    let mut controller = RolloutController::new(
        &cli.autoscaling_group,
        gateway,
        config,
        Arc::new(TokioClock),
    );

    let report = controller
        .run()
        .await
        .with_context(|| format!("rollout of {} aborted", cli.autoscaling_group))?;

    match cli.output {
        Format::Text => println!("{}", report.summary()),
        Format::Json => println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing rollout report")?
        ),
    }
    Ok(())
}
