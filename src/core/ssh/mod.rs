//! Remote command execution over SSH.
//!
//! Higher layers only see the [`Connector`] and [`RemoteExecutor`] traits so
//! node, plugin and exec logic can run against recorded fakes in tests.

mod client;

pub use client::{is_local_host, CommandOutput, Invocation, SshClient};

use std::path::Path;
use std::time::Duration;

use crate::cluster::Cluster;
use crate::defaults::SshDefaults;
use crate::error::{Error, Result};

/// A session to one host. Not shared across threads.
pub trait RemoteExecutor: Send {
    fn host(&self) -> &str;

    /// Run commands in order, streaming merged output as `[ip] line`.
    /// Stops at the first non-zero exit.
    fn cmd_async(&self, commands: &[String]) -> Result<()>;

    /// Run one command and return its raw combined output.
    fn cmd(&self, command: &str) -> Result<String>;

    /// Run one command and return trimmed stdout.
    fn cmd_to_string(&self, command: &str) -> Result<String>;

    /// Copy a local file or directory to `remote`, creating its parent.
    fn copy(&self, local: &Path, remote: &str) -> Result<()>;
}

pub trait Connector: Send + Sync {
    fn connect(&self, ip: &str, cluster: &Cluster) -> Result<Box<dyn RemoteExecutor>>;
}

/// Opens [`SshClient`] sessions using the cluster's credentials.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    pub defaults: SshDefaults,
}

impl SshConnector {
    pub fn new(defaults: SshDefaults) -> Self {
        Self { defaults }
    }
}

impl Connector for SshConnector {
    fn connect(&self, ip: &str, cluster: &Cluster) -> Result<Box<dyn RemoteExecutor>> {
        Ok(Box::new(SshClient::connect(ip, cluster, &self.defaults)?))
    }
}

/// Poll every host until a trivial command succeeds.
///
/// Hosts that answered are not probed again. Fails with `ssh.not_ready`
/// listing the hosts still unreachable after `attempts` rounds.
pub fn wait_ssh_ready(
    connector: &dyn Connector,
    cluster: &Cluster,
    ips: &[String],
    attempts: u32,
    interval: Duration,
) -> Result<()> {
    let mut pending: Vec<String> = ips.to_vec();
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        pending.retain(|ip| {
            connector
                .connect(ip, cluster)
                .and_then(|session| session.cmd_to_string("true"))
                .is_err()
        });

        if pending.is_empty() {
            return Ok(());
        }

        log_status!(
            "ssh",
            "Waiting for SSH on {} (attempt {}/{})",
            pending.join(", "),
            attempt,
            attempts
        );
        if attempt < attempts {
            std::thread::sleep(interval);
        }
    }

    Err(Error::ssh_not_ready(pending, attempts))
}
