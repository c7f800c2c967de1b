//! Session pool: one live connection per cluster node
//!
//! The pool is opened once at startup and owned exclusively by the
//! orchestration thread. Sessions are released when the pool is dropped,
//! including on abnormal exit paths (RAII teardown in each transport).

use crate::error::Result;
use crate::topology::ClusterTopology;
use crate::transport::{Connector, NodeTransport};

/// One node's live session
pub struct Session {
    addr: String,
    transport: Box<dyn NodeTransport>,
}

impl Session {
    /// Node address this session is connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Mutable access to the underlying transport.
    pub(crate) fn transport(&mut self) -> &mut dyn NodeTransport {
        self.transport.as_mut()
    }
}

/// All node sessions, in node index order
pub struct SessionPool {
    sessions: Vec<Session>,
    coordinator: usize,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field(
                "sessions",
                &self.sessions.iter().map(|s| &s.addr).collect::<Vec<_>>(),
            )
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl SessionPool {
    /// Connect to every node in the topology.
    ///
    /// Fails the whole pool if any node is unreachable; connectivity is not
    /// retried, the operator must fix it and re-run.
    pub fn open(topology: &ClusterTopology, connector: &dyn Connector) -> Result<Self> {
        tracing::info!(nodes = ?topology.nodes(), coordinator = %topology.coordinator(), "opening session pool");

        let mut sessions = Vec::with_capacity(topology.len());
        for addr in topology.nodes() {
            let transport = connector.connect(addr)?;
            sessions.push(Session {
                addr: addr.clone(),
                transport,
            });
        }

        Ok(Self {
            sessions,
            coordinator: topology.coordinator_index(),
        })
    }

    /// Number of connected nodes.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the pool is empty (never true after a successful open).
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Index of the coordinator node's session.
    pub fn coordinator_index(&self) -> usize {
        self.coordinator
    }

    /// Session for node `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range; callers clamp target counts to
    /// [`SessionPool::len`] first.
    pub(crate) fn session(&mut self, index: usize) -> &mut Session {
        &mut self.sessions[index]
    }

    /// Resolve an optional target count against the pool size.
    pub(crate) fn resolve_targets(&self, node_count: Option<usize>) -> usize {
        match node_count {
            Some(n) => n.min(self.sessions.len()),
            None => self.sessions.len(),
        }
    }

    /// Addresses of the first `count` nodes, for operator-audit logging.
    pub(crate) fn target_addrs(&self, count: usize) -> Vec<&str> {
        self.sessions[..count].iter().map(|s| s.addr.as_str()).collect()
    }
}
