//! Remote driver and latency aggregator for distributed benchmark clusters
//!
//! `clusterbench` holds one SSH session per node, launches benchmark
//! processes cluster-wide, watches their interleaved output for completion
//! and failure markers, and reduces per-node epoch metrics and latency
//! histograms into a single result per measurement point.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod histogram;
pub mod pool;
pub mod retry;
pub mod runner;
pub mod scanner;
pub mod ssh;
pub mod topology;
pub mod transport;

pub use config::{ClusterConfig, PointPlan, RunSpec};
pub use error::{Error, Result};
pub use executor::CommandExecutor;
pub use pool::SessionPool;
pub use retry::{RetryOrchestrator, RetryPolicy};
pub use runner::{run_point, PointMetrics};
pub use topology::ClusterTopology;
