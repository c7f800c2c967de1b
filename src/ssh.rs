//! SSH transport built on libssh2
//!
//! Each node gets one TCP session carrying three channels: a fresh exec
//! channel per short command (opened with a PTY so remote tools line-buffer),
//! one persistent interactive shell opened at connect time, and a lazily
//! opened SFTP channel for histogram files. Shell reads are non-blocking so
//! the executor's poll loop never parks indefinitely on an idle node.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};

use ssh2::{Channel, Session, Sftp};

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::transport::{Connector, ExecOutput, NodeTransport};

const SHELL_READ_BUF: usize = 16 * 1024;

// A fresh shell prints a banner/prompt before it is usable; give it a bounded
// grace period before declaring the node unreachable.
const BANNER_BUDGET: Duration = Duration::from_secs(10);

/// Connector establishing `ssh2` sessions with agent authentication
pub struct SshConnector {
    username: String,
    port: u16,
}

impl SshConnector {
    /// Build a connector from the cluster configuration.
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            username: config.ssh_username.clone(),
            port: config.ssh_port,
        }
    }
}

impl Connector for SshConnector {
    fn connect(&self, addr: &str) -> Result<Box<dyn NodeTransport>> {
        let tcp = TcpStream::connect((addr, self.port))
            .map_err(|e| Error::connectivity(addr, e))?;

        let mut session = Session::new().map_err(|e| Error::connectivity(addr, e))?;
        session.set_tcp_stream(tcp);
        session.set_compress(true);
        session.handshake().map_err(|e| Error::connectivity(addr, e))?;
        session
            .userauth_agent(&self.username)
            .map_err(|e| Error::connectivity(addr, e))?;

        let mut shell = session
            .channel_session()
            .map_err(|e| Error::connectivity(addr, e))?;
        shell
            .request_pty("xterm", None, None)
            .map_err(|e| Error::connectivity(addr, e))?;
        shell.shell().map_err(|e| Error::connectivity(addr, e))?;

        let mut transport = SshTransport {
            addr: addr.to_string(),
            session,
            shell,
            pending: None,
            sftp: None,
        };
        transport.drain_banner()?;

        tracing::info!(node = %addr, "session established");
        Ok(Box::new(transport))
    }
}

/// One node's live SSH session
pub struct SshTransport {
    addr: String,
    session: Session,
    shell: Channel,
    pending: Option<Channel>,
    sftp: Option<Sftp>,
}

impl SshTransport {
    /// Wait for the fresh shell to produce its banner, then discard it.
    fn drain_banner(&mut self) -> Result<()> {
        self.session.set_blocking(true);
        self.shell
            .write_all(b"\n")
            .map_err(|e| Error::connectivity(&self.addr, e))?;

        let deadline = Instant::now() + BANNER_BUDGET;
        loop {
            match self.shell_read()? {
                Some(_) => break,
                None if Instant::now() >= deadline => {
                    return Err(Error::connectivity(&self.addr, "shell produced no banner"));
                }
                None => std::thread::sleep(Duration::from_millis(50)),
            }
        }
        // Discard whatever else is already buffered.
        while self.shell_read()?.is_some() {}
        Ok(())
    }
}

impl NodeTransport for SshTransport {
    fn exec_start(&mut self, command: &str) -> Result<()> {
        self.session.set_blocking(true);
        self.session.set_timeout(0);

        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| Error::transport(&self.addr, e))?;
        channel
            .request_pty("xterm", None, None)
            .map_err(|e| Error::transport(&self.addr, e))?;
        channel
            .exec(command)
            .map_err(|e| Error::transport(&self.addr, e))?;

        self.pending = Some(channel);
        Ok(())
    }

    fn exec_finish(&mut self, timeout: Duration) -> Result<ExecOutput> {
        let mut channel = self
            .pending
            .take()
            .ok_or_else(|| Error::transport(&self.addr, "exec_finish without exec_start"))?;

        self.session.set_blocking(true);
        self.session
            .set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| Error::transport(&self.addr, e))?;

        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| Error::transport(&self.addr, e))?;

        channel
            .wait_close()
            .map_err(|e| Error::transport(&self.addr, e))?;
        self.session.set_timeout(0);

        Ok(ExecOutput::from_streams(&stdout, &stderr))
    }

    fn shell_send(&mut self, line: &str) -> Result<()> {
        self.session.set_blocking(true);
        self.shell
            .write_all(line.as_bytes())
            .map_err(|e| Error::transport(&self.addr, e))?;
        self.shell
            .flush()
            .map_err(|e| Error::transport(&self.addr, e))?;
        Ok(())
    }

    fn shell_read(&mut self) -> Result<Option<String>> {
        self.session.set_blocking(false);
        let mut buf = [0u8; SHELL_READ_BUF];
        let result = self.shell.read(&mut buf);
        self.session.set_blocking(true);

        match result {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::transport(&self.addr, e)),
        }
    }

    fn read_remote_file(&mut self, path: &str) -> Result<String> {
        self.session.set_blocking(true);
        self.session.set_timeout(0);

        let sftp = match &self.sftp {
            Some(sftp) => sftp,
            None => {
                let sftp = self
                    .session
                    .sftp()
                    .map_err(|e| Error::transport(&self.addr, e))?;
                self.sftp.insert(sftp)
            }
        };

        let mut file = sftp
            .open(Path::new(path))
            .map_err(|e| Error::transport(&self.addr, format!("{path}: {e}")))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| Error::transport(&self.addr, format!("{path}: {e}")))?;
        Ok(contents)
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        // Best-effort teardown so remote shells do not linger after abnormal
        // exits; errors here are unreportable.
        self.session.set_blocking(true);
        self.session.set_timeout(2_000);
        let _ = self.shell.close();
        let _ = self
            .session
            .disconnect(None, "clusterbench shutdown", None);
    }
}
