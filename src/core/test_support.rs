//! Recording fakes for the remote execution layer.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::cluster::{Cluster, Host, MASTER, NODE};
use crate::error::{Error, RemoteCommandFailedDetails, Result};
use crate::ssh::{Connector, RemoteExecutor};

#[derive(Default)]
struct State {
    log: Vec<(String, String)>,
    connects: HashMap<String, usize>,
}

/// Connector whose sessions record every command per host.
///
/// Failures are scripted by `(ip, needle)`: any command on `ip` containing
/// `needle` fails. Responses are scripted by needle for `cmd` and
/// `cmd_to_string`; unmatched queries return an empty string.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<State>>,
    failures: Vec<(String, String)>,
    responses: Vec<(Option<String>, String, String)>,
    unreachable: Vec<String>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, ip: &str, needle: &str) -> Self {
        self.failures.push((ip.to_string(), needle.to_string()));
        self
    }

    pub fn respond(mut self, needle: &str, output: &str) -> Self {
        self.responses
            .push((None, needle.to_string(), output.to_string()));
        self
    }

    pub fn respond_on(mut self, ip: &str, needle: &str, output: &str) -> Self {
        self.responses.push((
            Some(ip.to_string()),
            needle.to_string(),
            output.to_string(),
        ));
        self
    }

    pub fn unreachable(mut self, ip: &str) -> Self {
        self.unreachable.push(ip.to_string());
        self
    }

    pub fn log(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn commands_for(&self, ip: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|(host, _)| host == ip)
            .map(|(_, cmd)| cmd)
            .collect()
    }

    pub fn all_commands(&self) -> Vec<String> {
        self.log().into_iter().map(|(_, cmd)| cmd).collect()
    }

    pub fn connect_attempts(&self, ip: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .connects
            .get(ip)
            .copied()
            .unwrap_or(0)
    }
}

impl Connector for FakeConnector {
    fn connect(&self, ip: &str, _cluster: &Cluster) -> Result<Box<dyn RemoteExecutor>> {
        *self
            .state
            .lock()
            .unwrap()
            .connects
            .entry(ip.to_string())
            .or_insert(0) += 1;

        if self.unreachable.iter().any(|u| u == ip) {
            return Err(Error::ssh_connect_failed(ip, "connection refused"));
        }
        Ok(Box::new(FakeSession {
            ip: ip.to_string(),
            fake: self.clone(),
        }))
    }
}

struct FakeSession {
    ip: String,
    fake: FakeConnector,
}

impl FakeSession {
    fn record(&self, command: &str) -> Result<()> {
        self.fake
            .state
            .lock()
            .unwrap()
            .log
            .push((self.ip.clone(), command.to_string()));

        let fails = self
            .fake
            .failures
            .iter()
            .any(|(ip, needle)| ip == &self.ip && command.contains(needle.as_str()));
        if fails {
            return Err(Error::remote_command_failed(RemoteCommandFailedDetails {
                command: command.to_string(),
                exit_code: 1,
                output: "scripted failure".to_string(),
                host: self.ip.clone(),
            }));
        }
        Ok(())
    }

    fn response(&self, command: &str) -> String {
        self.fake
            .responses
            .iter()
            .find(|(ip, needle, _)| {
                ip.as_deref().map_or(true, |ip| ip == self.ip) && command.contains(needle.as_str())
            })
            .map(|(_, _, output)| output.clone())
            .unwrap_or_default()
    }
}

impl RemoteExecutor for FakeSession {
    fn host(&self) -> &str {
        &self.ip
    }

    fn cmd_async(&self, commands: &[String]) -> Result<()> {
        for command in commands {
            self.record(command)?;
        }
        Ok(())
    }

    fn cmd(&self, command: &str) -> Result<String> {
        self.record(command)?;
        Ok(self.response(command))
    }

    fn cmd_to_string(&self, command: &str) -> Result<String> {
        self.record(command)?;
        Ok(self.response(command).trim().to_string())
    }

    fn copy(&self, local: &Path, remote: &str) -> Result<()> {
        self.record(&format!("copy {} {}", local.display(), remote))
    }
}

pub fn cluster(masters: &[&str], nodes: &[&str]) -> Cluster {
    let to_vec = |ips: &[&str]| ips.iter().map(|ip| ip.to_string()).collect::<Vec<_>>();
    let mut hosts = vec![Host::new(to_vec(masters), vec![MASTER.to_string()])];
    if !nodes.is_empty() {
        hosts.push(Host::new(to_vec(nodes), vec![NODE.to_string()]));
    }
    Cluster::new("test", "kubernetes:v1.19.8", hosts)
}
