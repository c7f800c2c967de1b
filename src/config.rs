//! Run configuration types
//!
//! A run specification is one JSON file holding the cluster description and
//! the list of measurement points to execute against it.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::topology::ClusterTopology;

fn default_ssh_username() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".to_string())
}

fn default_ssh_port() -> u16 {
    22
}

fn default_short_timeout_secs() -> u64 {
    60
}

fn default_long_timeout_secs() -> u64 {
    600
}

fn default_poll_interval_ms() -> u64 {
    200
}

/// Cluster connection settings and executor budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Ordered node addresses; position is the node index
    pub cluster_ips: Vec<String>,

    /// Address of the coordinator node (must appear in `cluster_ips`)
    pub coordinator_ip: String,

    /// SSH login user (defaults to `$USER`)
    #[serde(default = "default_ssh_username")]
    pub ssh_username: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Wall-clock budget for short broadcast commands, in seconds
    #[serde(default = "default_short_timeout_secs")]
    pub short_timeout_secs: u64,

    /// Wall-clock budget covering an entire long-running multi-node wait,
    /// in seconds
    #[serde(default = "default_long_timeout_secs")]
    pub long_timeout_secs: u64,

    /// Sleep between empty shell reads while waiting for a sentinel,
    /// in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl ClusterConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_ips.is_empty() {
            return Err(Error::config("cluster_ips must not be empty"));
        }
        if self.short_timeout_secs == 0 || self.long_timeout_secs == 0 {
            return Err(Error::config("timeout budgets must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::config("poll_interval_ms must be positive"));
        }
        // Topology construction checks uniqueness and coordinator membership.
        self.topology().map(|_| ())
    }

    /// Build the immutable topology described by this configuration.
    pub fn topology(&self) -> Result<ClusterTopology> {
        ClusterTopology::new(self.cluster_ips.clone(), &self.coordinator_ip)
    }

    /// Budget for short broadcast commands.
    pub fn short_timeout(&self) -> Duration {
        Duration::from_secs(self.short_timeout_secs)
    }

    /// Budget for long-running broadcast waits.
    pub fn long_timeout(&self) -> Duration {
        Duration::from_secs(self.long_timeout_secs)
    }

    /// Sleep between empty shell reads.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// One measurement point: commands to run and where its artifacts land
///
/// The command strings are supplied by the external collaborator; the core
/// never interprets them beyond executing them on the right nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPlan {
    /// Display label for logs and the output record
    pub label: String,

    /// Best-effort shared-state cleanup, run on the coordinator only
    #[serde(default)]
    pub clear_cmd: Option<String>,

    /// Stale-process kill, broadcast to all target nodes
    #[serde(default)]
    pub kill_cmd: Option<String>,

    /// The long-running test command; must emit `[END]` when finished
    pub launch_cmd: String,

    /// How many nodes participate (all when absent)
    #[serde(default)]
    pub node_count: Option<usize>,

    /// Remote directory holding per-epoch latency histogram files
    pub lat_dir: String,

    /// Epoch whose metrics complete the point
    pub target_epoch: u64,

    /// Average metrics over the trailing epoch window instead of using the
    /// target epoch alone
    #[serde(default)]
    pub windowed: bool,
}

/// A full run: one cluster, many measurement points
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    /// Cluster connection settings
    pub cluster: ClusterConfig,
    /// Measurement points, executed in order
    pub points: Vec<PointPlan>,
}

impl RunSpec {
    /// Load and parse a run specification from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::config(format!("cannot parse {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_config() -> ClusterConfig {
        ClusterConfig {
            cluster_ips: vec!["10.0.0.1".into(), "10.0.0.2".into()],
            coordinator_ip: "10.0.0.1".into(),
            ssh_username: "bench".into(),
            ssh_port: 22,
            short_timeout_secs: 60,
            long_timeout_secs: 600,
            poll_interval_ms: 200,
        }
    }

    #[test]
    fn test_config_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_config_zero_budget_rejected() {
        let mut cfg = base_config();
        cfg.long_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_foreign_coordinator_rejected() {
        let mut cfg = base_config();
        cfg.coordinator_ip = "10.9.9.9".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_defaults_applied_on_parse() {
        let json = r#"{
            "cluster_ips": ["10.0.0.1"],
            "coordinator_ip": "10.0.0.1"
        }"#;
        let cfg: ClusterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.ssh_port, 22);
        assert_eq!(cfg.short_timeout_secs, 60);
        assert_eq!(cfg.long_timeout_secs, 600);
        assert_eq!(cfg.poll_interval_ms, 200);
    }

    #[test]
    fn test_run_spec_from_path() {
        let json = r#"{
            "cluster": {
                "cluster_ips": ["10.0.0.1", "10.0.0.2"],
                "coordinator_ip": "10.0.0.2"
            },
            "points": [{
                "label": "write_ratio_50",
                "kill_cmd": "killall -9 bench_test",
                "launch_cmd": "./bench_test 2 8",
                "lat_dir": "/home/bench/us_lat",
                "target_epoch": 10,
                "windowed": true
            }]
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let spec = RunSpec::from_path(file.path()).unwrap();
        assert_eq!(spec.points.len(), 1);
        assert_eq!(spec.points[0].label, "write_ratio_50");
        assert!(spec.points[0].clear_cmd.is_none());
        assert!(spec.points[0].node_count.is_none());
        assert!(spec.points[0].windowed);
        assert_eq!(spec.cluster.coordinator_ip, "10.0.0.2");
    }

    #[test]
    fn test_run_spec_malformed_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = RunSpec::from_path(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
