//! Error types for clusterbench
//!
//! The retry boundary's contract lives here: everything except
//! [`Error::Connectivity`] and [`Error::Config`] is retried at
//! measurement-point granularity by the orchestrator.

use std::fmt::Display;
use std::time::Duration;

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// A node was unreachable while opening the session pool.
    ///
    /// Fatal: the operator must fix connectivity before re-running.
    #[error("node {addr} unreachable: {reason}")]
    Connectivity {
        /// Address of the unreachable node
        addr: String,
        /// Underlying connect/handshake/auth failure
        reason: String,
    },

    /// Invalid topology, plan, or configuration file.
    #[error("configuration error: {0}")]
    Config(String),

    /// A wall-clock budget was exceeded on a broadcast or long-running wait.
    #[error("{op} exceeded its {budget:?} budget")]
    Timeout {
        /// The executor operation that ran out of budget
        op: &'static str,
        /// The budget that was exceeded
        budget: Duration,
    },

    /// A fatal sentinel was observed in a node's output stream.
    #[error("fatal marker {marker:?} observed on node {addr}")]
    Sentinel {
        /// The sentinel text that matched
        marker: &'static str,
        /// Node whose stream contained the marker
        addr: String,
    },

    /// A mandatory metric or percentile was not found in captured output.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Runtime SSH or IO trouble on an established session.
    #[error("transport error on node {addr}: {reason}")]
    Transport {
        /// Node whose session misbehaved
        addr: String,
        /// Underlying failure
        reason: String,
    },
}

impl Error {
    /// Build a connectivity error from any displayable cause.
    pub fn connectivity(addr: &str, reason: impl Display) -> Self {
        Error::Connectivity {
            addr: addr.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Build a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Build an extraction error.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Error::Extraction(msg.into())
    }

    /// Build a transport error from any displayable cause.
    pub fn transport(addr: &str, reason: impl Display) -> Self {
        Error::Transport {
            addr: addr.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the retry orchestrator may restart the measurement point.
    ///
    /// Connectivity and configuration failures abort the whole run instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. }
                | Error::Sentinel { .. }
                | Error::Extraction(_)
                | Error::Transport { .. }
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
