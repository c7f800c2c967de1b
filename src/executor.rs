//! Command execution over the session pool
//!
//! Three modes: short broadcast (one-shot exec, blocks on completion),
//! coordinator-only (best-effort cleanup), and long-running broadcast with
//! streaming completion detection. Fan-out is issue-first: commands reach
//! every target node before any result is gathered, then results are
//! collected in node-index order.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::pool::SessionPool;
use crate::scanner;
use crate::transport::ExecOutput;

/// Executes commands across the cluster within wall-clock budgets
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    short_timeout: Duration,
    long_timeout: Duration,
    poll_interval: Duration,
}

impl CommandExecutor {
    /// Build an executor with the configuration's budgets.
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            short_timeout: config.short_timeout(),
            long_timeout: config.long_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    /// Build an executor with explicit budgets (used by tests).
    pub fn with_budgets(
        short_timeout: Duration,
        long_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            short_timeout,
            long_timeout,
            poll_interval,
        }
    }

    /// Run a short command on the first `node_count` nodes (all when `None`)
    /// and block until every node's process exits.
    ///
    /// The whole round shares one wall-clock budget; exceeding it is
    /// `Error::Timeout`.
    pub fn broadcast_short(
        &self,
        pool: &mut SessionPool,
        command: &str,
        node_count: Option<usize>,
    ) -> Result<BTreeMap<String, ExecOutput>> {
        let targets = pool.resolve_targets(node_count);
        let deadline = Instant::now() + self.short_timeout;

        tracing::info!(command, nodes = ?pool.target_addrs(targets), "broadcast");

        // Issue to every node first so remote processes start together.
        for i in 0..targets {
            pool.session(i).transport().exec_start(command)?;
        }

        let mut results = BTreeMap::new();
        for i in 0..targets {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout {
                    op: "broadcast_short",
                    budget: self.short_timeout,
                });
            }

            let session = pool.session(i);
            let addr = session.addr().to_string();
            let output = match session.transport().exec_finish(remaining) {
                Ok(output) => output,
                Err(e) => {
                    if Instant::now() >= deadline {
                        return Err(Error::Timeout {
                            op: "broadcast_short",
                            budget: self.short_timeout,
                        });
                    }
                    return Err(e);
                }
            };

            for line in &output.stdout {
                tracing::info!(node = %addr, "{}", line.trim_end());
            }
            for line in &output.stderr {
                tracing::warn!(node = %addr, "{}", line.trim_end());
            }
            results.insert(addr, output);
        }

        Ok(results)
    }

    /// Run a command on the coordinator node only, best effort.
    ///
    /// Transport and exec failures are logged and swallowed; this path is
    /// used for cleanup commands whose failure must not abort the point.
    pub fn coordinator_only(&self, pool: &mut SessionPool, command: &str) -> Vec<String> {
        let index = pool.coordinator_index();
        let addr = pool.session(index).addr().to_string();

        tracing::info!(command, node = %addr, "coordinator command");

        let run = {
            let transport = pool.session(index).transport();
            transport
                .exec_start(command)
                .and_then(|_| transport.exec_finish(self.short_timeout))
        };

        match run {
            Ok(output) => {
                for line in &output.stdout {
                    tracing::info!(node = %addr, "{}", line.trim_end());
                }
                for line in &output.stderr {
                    tracing::warn!(node = %addr, "{}", line.trim_end());
                }
                output.stdout
            }
            Err(e) => {
                tracing::warn!(node = %addr, command, error = %e, "best-effort command failed");
                Vec::new()
            }
        }
    }

    /// Launch a long-running command on the first `node_count` nodes and
    /// stream each node's output until its completion sentinel appears.
    ///
    /// The newline-terminated command is written into every target shell
    /// before any node is waited on. While draining, each appended chunk is
    /// checked against the fatal sentinels first; a match aborts the whole
    /// wait with `Error::Sentinel`. One budget covers the entire multi-node
    /// wait.
    pub fn broadcast_long(
        &self,
        pool: &mut SessionPool,
        command: &str,
        node_count: Option<usize>,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let targets = pool.resolve_targets(node_count);
        let deadline = Instant::now() + self.long_timeout;

        tracing::info!(command, nodes = ?pool.target_addrs(targets), "broadcast (long)");

        let line = if command.ends_with('\n') {
            command.to_string()
        } else {
            format!("{command}\n")
        };
        for i in 0..targets {
            pool.session(i).transport().shell_send(&line)?;
        }

        let mut results = BTreeMap::new();
        for i in 0..targets {
            let session = pool.session(i);
            let addr = session.addr().to_string();
            let mut buffer = String::new();

            loop {
                if Instant::now() >= deadline {
                    return Err(Error::Timeout {
                        op: "broadcast_long",
                        budget: self.long_timeout,
                    });
                }

                match session.transport().shell_read()? {
                    Some(chunk) => {
                        for echoed in chunk.lines() {
                            tracing::info!(node = %addr, "{}", echoed.trim_end());
                        }
                        buffer.push_str(&chunk);

                        // Fatal markers win over completion, even within one
                        // buffered chunk.
                        if let Some(sentinel) = scanner::scan_fatal(&buffer) {
                            return Err(Error::Sentinel {
                                marker: sentinel.marker(),
                                addr,
                            });
                        }
                        if scanner::is_complete(&buffer) {
                            break;
                        }
                    }
                    None => std::thread::sleep(self.poll_interval),
                }
            }

            results.insert(addr, buffer.lines().map(str::to_string).collect());
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ClusterTopology;
    use crate::transport::mock::{MockConnector, MockTransport};

    const FAST: (Duration, Duration, Duration) = (
        Duration::from_millis(200),
        Duration::from_millis(200),
        Duration::from_millis(1),
    );

    fn executor() -> CommandExecutor {
        CommandExecutor::with_budgets(FAST.0, FAST.1, FAST.2)
    }

    fn pool_of(transports: Vec<MockTransport>, coordinator: &str) -> SessionPool {
        let addrs: Vec<String> = transports.iter().map(|t| t.addr.clone()).collect();
        let topo = ClusterTopology::new(addrs, coordinator).unwrap();
        let connector = MockConnector::new(transports);
        SessionPool::open(&topo, &connector).unwrap()
    }

    #[test]
    fn test_broadcast_short_captures_per_node_output() {
        let mut a = MockTransport::new("10.0.0.1");
        a.exec_output = ExecOutput::from_streams("built ok\n", "");
        let mut b = MockTransport::new("10.0.0.2");
        b.exec_output = ExecOutput::from_streams("built ok\n", "warning: stale cache\n");

        let mut pool = pool_of(vec![a, b], "10.0.0.1");
        let results = executor()
            .broadcast_short(&mut pool, "make -j", None)
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results["10.0.0.1"].stdout, vec!["built ok"]);
        assert_eq!(results["10.0.0.2"].stderr, vec!["warning: stale cache"]);
    }

    #[test]
    fn test_broadcast_short_respects_node_count() {
        let mut pool = pool_of(
            vec![MockTransport::new("10.0.0.1"), MockTransport::new("10.0.0.2")],
            "10.0.0.1",
        );
        let results = executor()
            .broadcast_short(&mut pool, "hostname", Some(1))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.contains_key("10.0.0.1"));
    }

    #[test]
    fn test_broadcast_short_transport_error_propagates() {
        let mut bad = MockTransport::new("10.0.0.1");
        bad.fail_exec = true;
        let mut pool = pool_of(vec![bad], "10.0.0.1");

        let err = executor()
            .broadcast_short(&mut pool, "hostname", None)
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_coordinator_only_targets_coordinator() {
        let mut a = MockTransport::new("10.0.0.1");
        a.exec_output = ExecOutput::from_streams("wrong node\n", "");
        let mut b = MockTransport::new("10.0.0.2");
        b.exec_output = ExecOutput::from_streams("state cleared\n", "");

        let mut pool = pool_of(vec![a, b], "10.0.0.2");
        let out = executor().coordinator_only(&mut pool, "restart_memc.sh");
        assert_eq!(out, vec!["state cleared"]);
    }

    #[test]
    fn test_coordinator_only_swallows_failures() {
        let mut bad = MockTransport::new("10.0.0.1");
        bad.fail_exec = true;
        let mut pool = pool_of(vec![bad], "10.0.0.1");

        // Best-effort: failure is logged, not returned.
        let out = executor().coordinator_only(&mut pool, "restart_memc.sh");
        assert!(out.is_empty());
    }

    #[test]
    fn test_broadcast_long_waits_for_end_sentinel() {
        let mut node = MockTransport::new("10.0.0.1");
        node.script_shell(&["epoch 1 passed!\n", "cluster throughput 42 Mops\n", "[END]\n"]);
        let mut pool = pool_of(vec![node], "10.0.0.1");

        let logs = executor()
            .broadcast_long(&mut pool, "./bench_test 1 8", None)
            .unwrap();
        let log = &logs["10.0.0.1"];
        assert!(log.iter().any(|l| l.contains("cluster throughput 42")));
        assert!(log.iter().any(|l| l.contains("[END]")));
    }

    #[test]
    fn test_broadcast_long_deadlock_aborts_before_end() {
        let mut node = MockTransport::new("10.0.0.1");
        // Fatal marker and completion arrive in the same chunk; the fatal
        // marker must win.
        node.script_shell(&["Deadlock\n[END]\n"]);
        let mut pool = pool_of(vec![node], "10.0.0.1");

        let err = executor()
            .broadcast_long(&mut pool, "./bench_test 1 8", None)
            .unwrap_err();
        match err {
            Error::Sentinel { marker, addr } => {
                assert_eq!(marker, scanner::DEADLOCK_SENTINEL);
                assert_eq!(addr, "10.0.0.1");
            }
            other => panic!("expected sentinel failure, got {other}"),
        }
    }

    #[test]
    fn test_broadcast_long_oom_aborts() {
        let mut node = MockTransport::new("10.0.0.1");
        node.script_shell(&["loading...\n", "shared memory space run out\n"]);
        let mut pool = pool_of(vec![node], "10.0.0.1");

        let err = executor()
            .broadcast_long(&mut pool, "./bench_test 1 8", None)
            .unwrap_err();
        assert!(matches!(err, Error::Sentinel { marker, .. } if marker == scanner::OOM_SENTINEL));
    }

    #[test]
    fn test_broadcast_long_times_out_without_sentinel() {
        let mut node = MockTransport::new("10.0.0.1");
        node.script_shell(&["still going\n"]);
        let mut pool = pool_of(vec![node], "10.0.0.1");

        let err = executor()
            .broadcast_long(&mut pool, "./bench_test 1 8", None)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                op: "broadcast_long",
                ..
            }
        ));
    }

    #[test]
    fn test_broadcast_long_gathers_in_node_index_order() {
        let mut a = MockTransport::new("10.0.0.1");
        a.script_shell(&["A done [END]\n"]);
        let mut b = MockTransport::new("10.0.0.2");
        b.script_shell(&["B done [END]\n"]);

        let mut pool = pool_of(vec![a, b], "10.0.0.1");
        let logs = executor()
            .broadcast_long(&mut pool, "./bench_test 2 8", None)
            .unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs["10.0.0.1"][0].starts_with("A done"));
        assert!(logs["10.0.0.2"][0].starts_with("B done"));
    }
}
