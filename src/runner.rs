//! Measurement-point runner
//!
//! One point is one full benchmark execution: optional coordinator-side
//! cleanup, optional cluster-wide process kill, the long launch command run
//! to its target epoch, then latency aggregation and metric extraction from
//! the captured logs. A failed attempt is re-run whole under the retry
//! policy, so every step must be safe to repeat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PointPlan;
use crate::error::Result;
use crate::executor::CommandExecutor;
use crate::histogram;
use crate::pool::SessionPool;
use crate::retry::RetryOrchestrator;
use crate::scanner;

/// Final metrics for one measurement point
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PointMetrics {
    /// Cluster-wide throughput
    pub throughput: f64,
    /// Cache hit rate
    pub cache_hit_rate: f64,
    /// Average lock/CAS failure count
    pub lock_fail_cnt: f64,
    /// Invalid-read rate, as a percentage
    pub invalid_read_rate: f64,
    /// Median latency
    pub p50_lat: f64,
    /// 99th percentile latency
    pub p99_lat: f64,
    /// When the point finished
    pub finished_at: DateTime<Utc>,
}

/// Run one attempt of a measurement point.
pub fn run_point_once(
    executor: &CommandExecutor,
    pool: &mut SessionPool,
    plan: &PointPlan,
) -> Result<PointMetrics> {
    tracing::info!(point = %plan.label, "starting point");

    if let Some(clear_cmd) = &plan.clear_cmd {
        executor.coordinator_only(pool, clear_cmd);
    }
    if let Some(kill_cmd) = &plan.kill_cmd {
        executor.broadcast_short(pool, kill_cmd, plan.node_count)?;
    }

    let logs = executor.broadcast_long(pool, &plan.launch_cmd, plan.node_count)?;

    let (p50_lat, p99_lat) = histogram::cluster_latencies(
        pool,
        &plan.lat_dir,
        plan.node_count,
        plan.target_epoch,
        plan.windowed,
    )?;
    let epoch = scanner::extract_cluster_metrics(&logs, plan.target_epoch, plan.windowed)?;

    let metrics = PointMetrics {
        throughput: epoch.throughput,
        cache_hit_rate: epoch.cache_hit_rate,
        lock_fail_cnt: epoch.lock_fail_cnt,
        invalid_read_rate: epoch.invalid_read_rate,
        p50_lat,
        p99_lat,
        finished_at: Utc::now(),
    };
    tracing::info!(
        point = %plan.label,
        throughput = metrics.throughput,
        p50 = metrics.p50_lat,
        p99 = metrics.p99_lat,
        "point complete"
    );
    Ok(metrics)
}

/// Run a measurement point to completion under the retry policy.
pub fn run_point(
    executor: &CommandExecutor,
    pool: &mut SessionPool,
    plan: &PointPlan,
    retry: &RetryOrchestrator,
) -> Result<PointMetrics> {
    retry.run(&plan.label, || run_point_once(executor, pool, plan))
}
