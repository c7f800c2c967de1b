//! Transport seam between the executor and concrete node sessions
//!
//! The traits are defined here so the executor, aggregator, and runner can be
//! exercised against scripted transports; the real implementation lives in
//! the `ssh` module.

use std::time::Duration;

use crate::error::Result;

/// Captured output of one one-shot command on one node
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Captured stdout, one entry per line
    pub stdout: Vec<String>,
    /// Captured stderr, one entry per line
    pub stderr: Vec<String>,
}

impl ExecOutput {
    /// Split raw captured streams into line vectors.
    pub fn from_streams(stdout: &str, stderr: &str) -> Self {
        Self {
            stdout: stdout.lines().map(str::to_string).collect(),
            stderr: stderr.lines().map(str::to_string).collect(),
        }
    }
}

/// One node's remote-execution surface
///
/// Three channels per node, mirroring what the executor needs:
/// a one-shot exec channel (issue first, gather later, so a broadcast can
/// fan out before blocking), a persistent interactive shell with
/// non-blocking reads, and a file-transfer channel.
pub trait NodeTransport: Send {
    /// Start `command` on a fresh exec channel with a pseudo-terminal.
    ///
    /// Returns as soon as the remote process has been started; output is
    /// collected by [`NodeTransport::exec_finish`].
    fn exec_start(&mut self, command: &str) -> Result<()>;

    /// Block until the pending exec command exits, bounded by `timeout`,
    /// and return its captured output.
    fn exec_finish(&mut self, timeout: Duration) -> Result<ExecOutput>;

    /// Write one already newline-terminated command into the persistent
    /// interactive shell.
    fn shell_send(&mut self, line: &str) -> Result<()>;

    /// Drain whatever bytes the shell has ready.
    ///
    /// Returns `Ok(None)` when no bytes are ready; never blocks.
    fn shell_read(&mut self) -> Result<Option<String>>;

    /// Read a remote file into a string over the file-transfer channel.
    fn read_remote_file(&mut self, path: &str) -> Result<String>;
}

/// Factory for node transports, one per node address
pub trait Connector {
    /// Establish a session to `addr`.
    ///
    /// Failures are `Error::Connectivity` and fail the whole pool.
    fn connect(&self, addr: &str) -> Result<Box<dyn NodeTransport>>;
}
