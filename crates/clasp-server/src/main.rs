//! Entry point for the Clasp cluster lock workload runner.
//!
//! Starts an in-process cluster, drives a lock contention workload across its
//! members and prints a JSON report. Exits with an error if any mutual
//! exclusion violation was observed.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use tracing::{error, info};

use clasp_consistency::{ClusterLockConfig, LockPolicyKind};
use clasp_core::{Configuration, PartitionConfig};
use clasp_server::{
    metrics,
    startup::{self, LoggingConfig},
    workload::{self, WorkloadConfig},
};

/// Command line arguments for the workload runner
#[derive(Debug, Parser)]
#[command(version, about = "Run a cluster lock contention workload")]
struct Cli {
    /// Configuration file (yaml, toml or json)
    #[arg(short = 'c', long = "config", env = "CLASP_CONFIG")]
    config: Option<PathBuf>,
    /// Number of cluster members
    #[arg(short = 'n', long = "nodes", default_value_t = 3)]
    nodes: usize,
    /// Lock policy, overrides `clasp.lock.policy`
    #[arg(short = 'p', long = "policy")]
    policy: Option<LockPolicyKind>,
    /// Lock attempts per member
    #[arg(short = 'r', long = "rounds", default_value_t = 100)]
    rounds: usize,
    /// Number of lock categories
    #[arg(long = "locks", default_value_t = 4)]
    locks: usize,
    /// Time spent inside a category once locked
    #[arg(long = "hold-ms", default_value_t = 2)]
    hold_ms: u64,
    /// Print Prometheus metrics after the report
    #[arg(long = "metrics")]
    metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let configuration = Configuration::load(args.config.as_deref())?;
    let _logging_guard = startup::init_logging(&LoggingConfig::from_env())?;

    let prometheus = if args.metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };
    metrics::init_metrics();

    let mut lock = ClusterLockConfig::from_configuration(&configuration)?;
    if let Some(policy) = args.policy {
        lock.policy = policy;
    }

    let config = WorkloadConfig {
        node_prefix: configuration.node_name(),
        nodes: args.nodes,
        rounds: args.rounds,
        locks: args.locks,
        hold: Duration::from_millis(args.hold_ms),
        lock,
        partition: PartitionConfig::from_configuration(&configuration)?,
    };

    let report = workload::run(config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(handle) = prometheus {
        println!("{}", handle.render());
    }

    if report.violations > 0 {
        error!(violations = report.violations, "Mutual exclusion violated");
        anyhow::bail!("{} mutual exclusion violations", report.violations);
    }

    info!("No mutual exclusion violations");
    Ok(())
}
