//! Command-line entry point

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use crate::config::RunSpec;
use crate::executor::CommandExecutor;
use crate::pool::SessionPool;
use crate::retry::{RetryOrchestrator, RetryPolicy};
use crate::runner::{self, PointMetrics};
use crate::ssh::SshConnector;

/// Drive a benchmark cluster over SSH and aggregate its results
#[derive(Debug, Parser)]
#[command(name = "clusterbench", version, about)]
pub struct Cli {
    /// Path to the run specification (JSON)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Where to write the per-point results (JSON)
    #[arg(short, long, default_value = "results/points.json")]
    pub output: PathBuf,

    /// Cap the attempts per point; omit to retry without bound
    #[arg(long, env = "CLUSTERBENCH_MAX_RETRIES")]
    pub max_retries: Option<usize>,
}

impl Cli {
    /// Run every point in the specification and write the results.
    pub fn run(self) -> anyhow::Result<()> {
        let spec = RunSpec::from_path(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;
        spec.cluster.validate()?;
        let topology = spec.cluster.topology()?;

        let connector = SshConnector::new(&spec.cluster);
        let mut pool = SessionPool::open(&topology, &connector)?;
        let executor = CommandExecutor::new(&spec.cluster);
        let retry = RetryOrchestrator::new(match self.max_retries {
            Some(max) => RetryPolicy::Capped(max),
            None => RetryPolicy::Unbounded,
        });

        let mut results: BTreeMap<String, PointMetrics> = BTreeMap::new();
        for plan in &spec.points {
            let metrics = runner::run_point(&executor, &mut pool, plan, &retry)
                .with_context(|| format!("running point {}", plan.label))?;
            results.insert(plan.label.clone(), metrics);
        }

        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let file = fs::File::create(&self.output)
            .with_context(|| format!("writing {}", self.output.display()))?;
        serde_json::to_writer_pretty(file, &results)?;

        tracing::info!(points = results.len(), output = %self.output.display(), "run complete");
        Ok(())
    }
}
