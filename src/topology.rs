//! Static cluster topology
//!
//! Node order is significant: the position of an address in the node list is
//! the node index used by the executor, the scanner, and the aggregator.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Immutable description of the benchmark cluster
///
/// Holds the ordered node addresses and the index of the coordinator node,
/// the single node that runs cluster-wide setup and cleanup commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTopology {
    nodes: Vec<String>,
    coordinator: usize,
}

impl ClusterTopology {
    /// Build a topology from ordered node addresses and the coordinator's
    /// address.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the node list is empty, contains duplicate
    /// addresses, or does not contain the coordinator.
    pub fn new(nodes: Vec<String>, coordinator_addr: &str) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::config("cluster must contain at least one node"));
        }

        let mut seen = HashSet::new();
        for addr in &nodes {
            if !seen.insert(addr.as_str()) {
                return Err(Error::config(format!("duplicate node address: {addr}")));
            }
        }

        let coordinator = nodes
            .iter()
            .position(|addr| addr == coordinator_addr)
            .ok_or_else(|| {
                Error::config(format!(
                    "coordinator {coordinator_addr} is not a cluster node"
                ))
            })?;

        Ok(Self { nodes, coordinator })
    }

    /// All node addresses, in index order.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Number of nodes in the cluster.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the topology is empty (never true after construction).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the coordinator node.
    pub fn coordinator_index(&self) -> usize {
        self.coordinator
    }

    /// Address of the coordinator node.
    pub fn coordinator(&self) -> &str {
        &self.nodes[self.coordinator]
    }
}
