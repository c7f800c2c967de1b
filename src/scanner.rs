//! Sentinel detection and metric extraction over captured node output
//!
//! The benchmark binary's output is plain text with a handful of recognized
//! line shapes. Each shape is one [`MetricRule`]: a literal needle plus a
//! fixed whitespace-token position, so malformed lines degrade by explicit
//! defaulting instead of panicking on a missing token.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Completion marker emitted by the test binary when it is finished
pub const END_SENTINEL: &str = "[END]";
/// Fatal marker: the shared memory service ran out of space
pub const OOM_SENTINEL: &str = "shared memory space run out";
/// Fatal marker: the test binary detected a deadlock
pub const DEADLOCK_SENTINEL: &str = "Deadlock";

/// A fatal run condition matched in a live output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalSentinel {
    /// Shared memory space exhausted
    OutOfMemory,
    /// Deadlock detected
    Deadlock,
}

impl FatalSentinel {
    /// The literal marker text that matched.
    pub fn marker(self) -> &'static str {
        match self {
            FatalSentinel::OutOfMemory => OOM_SENTINEL,
            FatalSentinel::Deadlock => DEADLOCK_SENTINEL,
        }
    }
}

/// Check an accumulated buffer for a fatal sentinel.
///
/// Callers must check this before [`is_complete`]: a fatal marker aborts the
/// wait even when `[END]` arrives in the same buffered chunk.
pub fn scan_fatal(buffer: &str) -> Option<FatalSentinel> {
    if buffer.contains(OOM_SENTINEL) {
        Some(FatalSentinel::OutOfMemory)
    } else if buffer.contains(DEADLOCK_SENTINEL) {
        Some(FatalSentinel::Deadlock)
    } else {
        None
    }
}

/// Whether the accumulated buffer contains the completion sentinel.
pub fn is_complete(buffer: &str) -> bool {
    buffer.contains(END_SENTINEL)
}

/// First epoch of the trailing averaging window for `target_epoch`.
pub fn window_start(target_epoch: u64) -> u64 {
    (target_epoch / 2).max(target_epoch.saturating_sub(4))
}

// One rule per recognized metric line shape.
struct MetricRule {
    needle: &'static str,
    token: usize,
    scale: f64,
}

impl MetricRule {
    const fn new(needle: &'static str, token: usize, scale: f64) -> Self {
        Self {
            needle,
            token,
            scale,
        }
    }

    fn matches(&self, line: &str) -> bool {
        line.contains(self.needle)
    }

    /// Parse the value token; `None` when the token is missing or malformed,
    /// which callers turn into the metric's default.
    fn extract(&self, line: &str) -> Option<f64> {
        line.split_whitespace()
            .nth(self.token)
            .and_then(|tok| tok.parse::<f64>().ok())
            .map(|v| v * self.scale)
    }
}

const THROUGHPUT: MetricRule = MetricRule::new("cluster throughput", 2, 1.0);
const CACHE_HIT: MetricRule = MetricRule::new("cache hit rate", 3, 1.0);
const LOCK_FAIL: MetricRule = MetricRule::new("avg. lock/cas fail cnt", 4, 1.0);
// Reported by the binary as a raw fraction; surfaced as a percentage.
const INVALID_READ: MetricRule = MetricRule::new("read invalid leaf rate", 4, 100.0);

const REDUNDANT_READ: MetricRule = MetricRule::new("Avg. redundant rdma_read", 3, 1.0);
const REDUNDANT_WRITE: MetricRule = MetricRule::new("Avg. redundant rdma_write", 3, 1.0);
const REDUNDANT_CAS: MetricRule = MetricRule::new("Avg. redundant rdma_cas", 3, 1.0);

const REDUNDANCY_MARKER: &str = "Calculation done!";

fn epoch_marker(epoch: u64) -> String {
    format!("epoch {epoch} passed!")
}

/// Metrics extracted from one epoch (or averaged over an epoch window)
///
/// Throughput is mandatory; the other metrics default to zero when their
/// lines are absent or malformed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Cluster-wide throughput
    pub throughput: f64,
    /// Cache hit rate
    pub cache_hit_rate: f64,
    /// Average lock/CAS failure count
    pub lock_fail_cnt: f64,
    /// Invalid-read rate, as a percentage
    pub invalid_read_rate: f64,
}

/// Extract one epoch's metrics from a single node's captured log.
///
/// Lines before the target epoch's `passed!` marker are ignored; after it,
/// the first occurrence of each recognized metric is taken, stopping at the
/// invalid-read-rate line. Returns `None` when the throughput line never
/// appears (the node did not report this epoch).
pub fn parse_epoch(log: &[String], target_epoch: u64) -> Option<EpochMetrics> {
    let marker = epoch_marker(target_epoch);
    let mut armed = false;

    let mut throughput = None;
    let mut cache_hit_rate = None;
    let mut lock_fail_cnt = None;
    let mut invalid_read_rate = None;

    for line in log {
        if line.contains(&marker) {
            armed = true;
        } else if armed && THROUGHPUT.matches(line) {
            if throughput.is_none() {
                throughput = THROUGHPUT.extract(line);
            }
        } else if armed && CACHE_HIT.matches(line) {
            if cache_hit_rate.is_none() {
                cache_hit_rate = CACHE_HIT.extract(line);
            }
        } else if armed && LOCK_FAIL.matches(line) {
            if lock_fail_cnt.is_none() {
                lock_fail_cnt = LOCK_FAIL.extract(line);
            }
        } else if armed && INVALID_READ.matches(line) {
            if invalid_read_rate.is_none() {
                invalid_read_rate = INVALID_READ.extract(line);
            }
            // Last recognized metric of an epoch report.
            break;
        }
    }

    throughput.map(|tpt| EpochMetrics {
        throughput: tpt,
        cache_hit_rate: cache_hit_rate.unwrap_or(0.0),
        lock_fail_cnt: lock_fail_cnt.unwrap_or(0.0),
        invalid_read_rate: invalid_read_rate.unwrap_or(0.0),
    })
}

/// Extract metrics averaged over the window `[window_start, target]`.
///
/// One full metric tuple is collected per epoch, starting at the window-start
/// epoch's `passed!` marker, until the target epoch's tuple is in. Returns
/// `None` when no throughput line was seen in the whole window.
pub fn parse_epoch_window(log: &[String], target_epoch: u64) -> Option<EpochMetrics> {
    let start = window_start(target_epoch);
    let marker = epoch_marker(start);
    let window_len = target_epoch - start + 1;

    let mut armed = false;
    let mut epochs_done = 0u64;

    let mut throughput = Vec::new();
    let mut cache_hit_rate = Vec::new();
    let mut lock_fail_cnt = Vec::new();
    let mut invalid_read_rate = Vec::new();

    for line in log {
        if line.contains(&marker) {
            armed = true;
        } else if armed && THROUGHPUT.matches(line) {
            if let Some(v) = THROUGHPUT.extract(line) {
                throughput.push(v);
            }
        } else if armed && CACHE_HIT.matches(line) {
            if let Some(v) = CACHE_HIT.extract(line) {
                cache_hit_rate.push(v);
            }
        } else if armed && LOCK_FAIL.matches(line) {
            if let Some(v) = LOCK_FAIL.extract(line) {
                lock_fail_cnt.push(v);
            }
        } else if armed && INVALID_READ.matches(line) {
            if let Some(v) = INVALID_READ.extract(line) {
                invalid_read_rate.push(v);
            }
            epochs_done += 1;
            if epochs_done == window_len {
                break;
            }
        }
    }

    fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    if throughput.is_empty() {
        return None;
    }
    Some(EpochMetrics {
        throughput: mean(&throughput),
        cache_hit_rate: mean(&cache_hit_rate),
        lock_fail_cnt: mean(&lock_fail_cnt),
        invalid_read_rate: mean(&invalid_read_rate),
    })
}

/// Average redundant-operation counts reported after `Calculation done!`
#[derive(Debug, Clone, Copy, Default)]
pub struct RedundancyMetrics {
    /// Average redundant RDMA reads
    pub read: Option<f64>,
    /// Average redundant RDMA writes
    pub write: Option<f64>,
    /// Average redundant RDMA CAS operations
    pub cas: Option<f64>,
}

/// Extract redundancy statistics from a single node's captured log.
pub fn parse_redundancy(log: &[String]) -> RedundancyMetrics {
    let mut armed = false;
    let mut metrics = RedundancyMetrics::default();

    for line in log {
        if line.contains(REDUNDANCY_MARKER) {
            armed = true;
        } else if armed && REDUNDANT_READ.matches(line) {
            metrics.read = REDUNDANT_READ.extract(line);
        } else if armed && REDUNDANT_WRITE.matches(line) {
            metrics.write = REDUNDANT_WRITE.extract(line);
        } else if armed && REDUNDANT_CAS.matches(line) {
            metrics.cas = REDUNDANT_CAS.extract(line);
            break;
        }
    }

    metrics
}

/// Extract cluster metrics from many nodes' captured logs.
///
/// Nodes are interchangeable reporters of cluster-wide throughput, so the
/// first node yielding a throughput wins. No node yielding one fails the
/// measurement point.
pub fn extract_cluster_metrics(
    logs: &BTreeMap<String, Vec<String>>,
    target_epoch: u64,
    windowed: bool,
) -> Result<EpochMetrics> {
    for (addr, log) in logs {
        let metrics = if windowed {
            parse_epoch_window(log, target_epoch)
        } else {
            parse_epoch(log, target_epoch)
        };
        if let Some(metrics) = metrics {
            tracing::debug!(node = %addr, throughput = metrics.throughput, "metrics extracted");
            return Ok(metrics);
        }
    }
    Err(Error::extraction(format!(
        "no node reported cluster throughput for epoch {target_epoch}"
    )))
}
