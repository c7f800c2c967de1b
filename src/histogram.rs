//! Latency histogram aggregation
//!
//! Each node writes one histogram file per epoch: tab-separated
//! `latency<TAB>count` records. Merging sums counts for the same latency
//! value across all nodes of an epoch; percentiles are nearest-rank over the
//! merged buckets. Buckets are created fresh per epoch so a retried attempt
//! can never see stale counts.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::pool::SessionPool;
use crate::scanner::window_start;

/// Merged latency buckets for one epoch
///
/// Keys are the latency values exactly as found in the files, so two nodes
/// reporting the same textual latency always land in the same bucket.
#[derive(Debug, Default)]
pub struct LatencyBuckets {
    counts: HashMap<String, u64>,
}

impl LatencyBuckets {
    /// Create an empty bucket set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` occurrences of `latency`. Zero counts are ignored.
    pub fn add(&mut self, latency: &str, count: u64) {
        if count > 0 {
            *self.counts.entry(latency.to_string()).or_insert(0) += count;
        }
    }

    /// Merge every valid record of one histogram file.
    ///
    /// Records whose latency does not parse as a number or whose count does
    /// not parse as an integer are skipped.
    pub fn merge_text(&mut self, text: &str) {
        for line in text.lines() {
            let Some((latency, count)) = line.split_once('\t') else {
                continue;
            };
            let latency = latency.trim();
            if latency.parse::<f64>().is_err() {
                continue;
            }
            let Ok(count) = count.trim().parse::<u64>() else {
                continue;
            };
            self.add(latency, count);
        }
    }

    /// Total occurrence count across all buckets.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Whether no records have been merged.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Nearest-rank p50 and p99 over the merged buckets.
    ///
    /// Distinct latency values are sorted numerically ascending; the
    /// cumulative count is walked and each percentile is the first value at
    /// which it reaches that share of the total (ties to the first value).
    pub fn percentiles(&self) -> Result<(f64, f64)> {
        let total = self.total();
        if total == 0 {
            return Err(Error::extraction("no latency records merged"));
        }

        let mut buckets: Vec<(f64, u64)> = self
            .counts
            .iter()
            .filter_map(|(latency, count)| latency.parse::<f64>().ok().map(|v| (v, *count)))
            .collect();
        buckets.sort_by(|a, b| a.0.total_cmp(&b.0));

        let th50 = total as f64 * 0.5;
        let th99 = total as f64 * 0.99;

        let mut cumulative = 0u64;
        let mut p50 = None;
        let mut p99 = None;
        for (latency, count) in buckets {
            cumulative += count;
            if p50.is_none() && cumulative as f64 >= th50 {
                p50 = Some(latency);
            }
            if cumulative as f64 >= th99 {
                p99 = Some(latency);
                break;
            }
        }

        match (p50, p99) {
            (Some(p50), Some(p99)) => Ok((p50, p99)),
            _ => Err(Error::extraction("p50/p99 not reached in merged buckets")),
        }
    }
}

fn epoch_path(lat_dir: &str, epoch: u64) -> String {
    format!("{}/epoch_{epoch}.lat", lat_dir.trim_end_matches('/'))
}

/// Fetch and merge per-node histogram files for a range of epochs.
///
/// For each epoch in `[epoch_start, epoch_start + epoch_count)` a fresh
/// bucket set is filled from the first `node_count` nodes' files and reduced
/// to its percentile pair. Epochs with no merged records are skipped in the
/// result map.
pub fn merge_epochs(
    pool: &mut SessionPool,
    lat_dir: &str,
    node_count: Option<usize>,
    epoch_start: u64,
    epoch_count: u64,
) -> Result<BTreeMap<u64, (f64, f64)>> {
    let targets = pool.resolve_targets(node_count);
    let mut results = BTreeMap::new();

    for epoch in epoch_start..epoch_start + epoch_count {
        let mut buckets = LatencyBuckets::new();
        let path = epoch_path(lat_dir, epoch);
        for i in 0..targets {
            let text = pool.session(i).transport().read_remote_file(&path)?;
            buckets.merge_text(&text);
        }

        if buckets.is_empty() {
            continue;
        }
        let (p50, p99) = buckets.percentiles()?;
        tracing::info!(epoch, p50, p99, "merged epoch latencies");
        results.insert(epoch, (p50, p99));
    }

    Ok(results)
}

/// The cluster's latency percentiles for one measurement point.
///
/// Single-epoch mode returns the target epoch's pair; windowed mode returns
/// the arithmetic mean of the per-epoch pairs over
/// `[window_start(target), target]` — an average of percentiles, never a
/// re-merge of raw counts. A requested epoch with no percentiles is
/// `Error::Extraction`.
pub fn cluster_latencies(
    pool: &mut SessionPool,
    lat_dir: &str,
    node_count: Option<usize>,
    target_epoch: u64,
    windowed: bool,
) -> Result<(f64, f64)> {
    if windowed {
        let start = window_start(target_epoch);
        let merged = merge_epochs(pool, lat_dir, node_count, start, target_epoch - start + 1)?;
        if merged.is_empty() {
            return Err(Error::extraction(format!(
                "no latency records in epochs {start}..={target_epoch}"
            )));
        }
        let n = merged.len() as f64;
        let p50 = merged.values().map(|(p50, _)| p50).sum::<f64>() / n;
        let p99 = merged.values().map(|(_, p99)| p99).sum::<f64>() / n;
        Ok((p50, p99))
    } else {
        merge_epochs(pool, lat_dir, node_count, target_epoch, 1)?
            .get(&target_epoch)
            .copied()
            .ok_or_else(|| {
                Error::extraction(format!("no latency records for epoch {target_epoch}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ClusterTopology;
    use crate::transport::mock::{MockConnector, MockTransport};

    #[test]
    fn test_nearest_rank_skewed_distribution() {
        let mut buckets = LatencyBuckets::new();
        buckets.add("10", 1);
        buckets.add("20", 1);
        buckets.add("30", 1);
        buckets.add("40", 97);

        let (p50, p99) = buckets.percentiles().unwrap();
        assert_eq!(p50, 40.0);
        assert_eq!(p99, 40.0);
    }

    #[test]
    fn test_nearest_rank_two_buckets() {
        let mut buckets = LatencyBuckets::new();
        buckets.add("1", 50);
        buckets.add("2", 50);

        let (p50, p99) = buckets.percentiles().unwrap();
        assert_eq!(p50, 1.0);
        assert_eq!(p99, 2.0);
    }

    #[test]
    fn test_merge_is_commutative() {
        let file_a = "1.5\t3\n2.5\t7\n";
        let file_b = "2.5\t5\n9.0\t1\n";

        let mut ab = LatencyBuckets::new();
        ab.merge_text(file_a);
        ab.merge_text(file_b);

        let mut ba = LatencyBuckets::new();
        ba.merge_text(file_b);
        ba.merge_text(file_a);

        assert_eq!(ab.total(), ba.total());
        assert_eq!(ab.percentiles().unwrap(), ba.percentiles().unwrap());
    }

    #[test]
    fn test_merge_skips_zero_counts_and_malformed_lines() {
        let mut buckets = LatencyBuckets::new();
        buckets.merge_text("1.0\t0\nnot a record\n2.0\tfive\n3.0\t2\n");
        assert_eq!(buckets.total(), 2);
    }

    #[test]
    fn test_empty_buckets_fail_percentiles() {
        let buckets = LatencyBuckets::new();
        assert!(matches!(
            buckets.percentiles().unwrap_err(),
            Error::Extraction(_)
        ));
    }

    #[test]
    fn test_numeric_sort_not_lexicographic() {
        let mut buckets = LatencyBuckets::new();
        buckets.add("9.0", 50);
        buckets.add("10.0", 50);

        // Lexicographically "10.0" < "9.0"; numerically it is not.
        let (p50, p99) = buckets.percentiles().unwrap();
        assert_eq!(p50, 9.0);
        assert_eq!(p99, 10.0);
    }

    fn pool_with_files(files: Vec<(&str, Vec<(&str, &str)>)>) -> SessionPool {
        let mut transports = Vec::new();
        let mut addrs = Vec::new();
        for (addr, node_files) in files {
            let mut t = MockTransport::new(addr);
            for (path, contents) in node_files {
                t.add_file(path, contents);
            }
            addrs.push(addr.to_string());
            transports.push(t);
        }
        let topo = ClusterTopology::new(addrs.clone(), &addrs[0]).unwrap();
        SessionPool::open(&topo, &MockConnector::new(transports)).unwrap()
    }

    #[test]
    fn test_merge_epochs_across_nodes() {
        let mut pool = pool_with_files(vec![
            ("10.0.0.1", vec![("/lat/epoch_5.lat", "1\t50\n")]),
            ("10.0.0.2", vec![("/lat/epoch_5.lat", "2\t50\n")]),
        ]);

        let merged = merge_epochs(&mut pool, "/lat", None, 5, 1).unwrap();
        assert_eq!(merged[&5], (1.0, 2.0));
    }

    #[test]
    fn test_merge_epochs_skips_empty_epoch() {
        let mut pool = pool_with_files(vec![(
            "10.0.0.1",
            vec![
                ("/lat/epoch_5.lat", ""),
                ("/lat/epoch_6.lat", "4\t100\n"),
            ],
        )]);

        let merged = merge_epochs(&mut pool, "/lat", None, 5, 2).unwrap();
        assert!(!merged.contains_key(&5));
        assert_eq!(merged[&6], (4.0, 4.0));
    }

    #[test]
    fn test_cluster_latencies_single_epoch() {
        let mut pool = pool_with_files(vec![(
            "10.0.0.1",
            vec![("/lat/epoch_10.lat", "10\t1\n20\t1\n30\t1\n40\t97\n")],
        )]);

        let (p50, p99) = cluster_latencies(&mut pool, "/lat", None, 10, false).unwrap();
        assert_eq!(p50, 40.0);
        assert_eq!(p99, 40.0);
    }

    #[test]
    fn test_cluster_latencies_windowed_averages_per_epoch_percentiles() {
        // Epochs 6..=10 with single-bucket histograms 100,200,300,400,500:
        // averaging the per-epoch percentiles gives 300. Re-merging the raw
        // counts instead would put p99 at 500, so this also pins the
        // average-of-percentiles semantics.
        let files: Vec<(&str, &str)> = vec![
            ("/lat/epoch_6.lat", "100\t10\n"),
            ("/lat/epoch_7.lat", "200\t10\n"),
            ("/lat/epoch_8.lat", "300\t10\n"),
            ("/lat/epoch_9.lat", "400\t10\n"),
            ("/lat/epoch_10.lat", "500\t10\n"),
        ];
        let mut pool = pool_with_files(vec![("10.0.0.1", files)]);

        let (p50, p99) = cluster_latencies(&mut pool, "/lat", None, 10, true).unwrap();
        assert_eq!(p50, 300.0);
        assert_eq!(p99, 300.0);
    }

    #[test]
    fn test_cluster_latencies_missing_epoch_is_extraction_failure() {
        let mut pool = pool_with_files(vec![("10.0.0.1", vec![("/lat/epoch_9.lat", "")])]);
        let err = cluster_latencies(&mut pool, "/lat", None, 9, false).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn test_missing_file_is_transport_failure() {
        let mut pool = pool_with_files(vec![("10.0.0.1", vec![])]);
        let err = cluster_latencies(&mut pool, "/lat", None, 3, false).unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(err.is_retryable());
    }
}
