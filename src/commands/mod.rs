use std::path::PathBuf;
use std::sync::Arc;

use converge::cluster::{Cluster, Host, NODE};
use converge::clusterfile::ClusterFile;
use converge::defaults::{self, Defaults};
use converge::paths;
use converge::plugin::{parse_selector, PluginRegistry, Selector};
use converge::ssh::{Connector, SshConnector};

pub type CmdResult<T> = converge::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub clusterfile: Option<String>,
    pub cluster: String,
}

impl GlobalArgs {
    pub fn clusterfile_path(&self) -> converge::Result<PathBuf> {
        match &self.clusterfile {
            Some(path) => Ok(PathBuf::from(shellexpand::tilde(path).as_ref())),
            None => paths::cluster_file(&self.cluster),
        }
    }

    pub fn load(&self) -> converge::Result<(PathBuf, ClusterFile)> {
        let path = self.clusterfile_path()?;
        let file = ClusterFile::load(&path)?;
        Ok((path, file))
    }
}

/// Process-wide handles shared by every command.
pub(crate) struct Runtime {
    pub defaults: Defaults,
    pub connector: Arc<dyn Connector>,
    pub registry: Arc<PluginRegistry>,
}

impl Runtime {
    pub fn load() -> Self {
        let defaults = defaults::load_defaults();
        let connector: Arc<dyn Connector> = Arc::new(SshConnector::new(defaults.ssh.clone()));
        let registry = Arc::new(PluginRegistry::with_builtin(
            Arc::clone(&connector),
            defaults.runtime.rootfs_base.clone(),
        ));
        Self {
            defaults,
            connector,
            registry,
        }
    }
}

/// Expand `--nodes` values: addresses, comma lists and IPv4 ranges.
pub(crate) fn parse_ips(values: &[String]) -> converge::Result<Vec<String>> {
    let raw = values.join(",");
    if raw.trim().is_empty() {
        return Err(converge::Error::validation_missing_argument(vec![
            "nodes".to_string(),
        ]));
    }
    let invalid = |message: String| {
        converge::Error::validation_invalid_argument("nodes", message, Some(raw.clone()), None)
    };
    match parse_selector(&raw).map_err(|e| invalid(e.message))? {
        Selector::Addresses(ips) => Ok(ips),
        Selector::Role(role) => Err(invalid(format!("'{}' is not an IP address", role))),
    }
}

/// Append `ips` to the cluster's worker group, creating it when missing.
pub(crate) fn add_node_ips(cluster: &mut Cluster, ips: &[String]) {
    let existing = cluster.all_ips();
    let fresh: Vec<String> = ips
        .iter()
        .filter(|ip| !existing.contains(ip))
        .cloned()
        .collect();
    if fresh.is_empty() {
        return;
    }

    match cluster
        .spec
        .hosts
        .iter_mut()
        .find(|host| host.has_role(NODE))
    {
        Some(group) => group.ips.extend(fresh),
        None => cluster
            .spec
            .hosts
            .push(Host::new(fresh, vec![NODE.to_string()])),
    }
}

/// Drop `ips` from every worker group. Empty worker groups are removed.
pub(crate) fn remove_node_ips(cluster: &mut Cluster, ips: &[String]) {
    for host in cluster.spec.hosts.iter_mut().filter(|h| h.has_role(NODE)) {
        host.ips.retain(|ip| !ips.contains(ip));
    }
    cluster
        .spec
        .hosts
        .retain(|host| !(host.has_role(NODE) && host.ips.is_empty()));
}

pub mod delete;
pub mod exec;
pub mod gen;
pub mod install;
pub mod join;
pub mod plugins;
pub mod render;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (converge::Result<serde_json::Value>, i32) {
    crate::tty::status("converge is working...");

    match command {
        crate::Commands::Join(args) => dispatch!(args, global, join),
        crate::Commands::Delete(args) => dispatch!(args, global, delete),
        crate::Commands::Exec(args) => dispatch!(args, global, exec),
        crate::Commands::Install(args) => dispatch!(args, global, install),
        crate::Commands::Gen(args) => dispatch!(args, global, gen),
        crate::Commands::Render(args) => dispatch!(args, global, render),
        crate::Commands::Plugins(args) => dispatch!(args, global, plugins),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::cluster::MASTER;

    fn cluster() -> Cluster {
        Cluster::new(
            "c",
            "kubernetes:v1.19.8",
            vec![Host::new(vec!["10.0.0.1".to_string()], vec![MASTER.to_string()])],
        )
    }

    #[test]
    fn node_ranges_expand() {
        let ips = parse_ips(&["10.0.0.2-10.0.0.4".to_string(), "10.0.0.9".to_string()]).unwrap();
        assert_eq!(ips, vec!["10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.9"]);
        assert!(parse_ips(&[]).is_err());
        assert!(parse_ips(&["nope".to_string()]).is_err());
    }

    #[test]
    fn joined_ips_land_in_a_worker_group_once() {
        let mut cluster = cluster();
        add_node_ips(&mut cluster, &["10.0.0.2".to_string(), "10.0.0.1".to_string()]);
        add_node_ips(&mut cluster, &["10.0.0.2".to_string(), "10.0.0.3".to_string()]);
        assert_eq!(cluster.node_ips(), vec!["10.0.0.2", "10.0.0.3"]);
        assert_eq!(cluster.master_ips(), vec!["10.0.0.1"]);
    }

    #[test]
    fn removing_last_worker_drops_the_group() {
        let mut cluster = cluster();
        add_node_ips(&mut cluster, &["10.0.0.2".to_string()]);
        remove_node_ips(&mut cluster, &["10.0.0.2".to_string()]);
        assert!(cluster.node_ips().is_empty());
        assert_eq!(cluster.spec.hosts.len(), 1);
    }
}
