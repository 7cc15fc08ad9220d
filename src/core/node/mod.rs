//! Adding and removing worker nodes on a running control plane.
//!
//! Join: merge kubeadm settings, wait for SSH, ship the registry CA, mint a
//! bootstrap token on master0, then join every node concurrently. Delete:
//! reset each node, drop its VIP route and remove it from the API server.
//! Both run every node to completion and report all failures together.

pub mod commands;
pub mod kubeadm;
pub mod lvscare;
pub mod registry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::batch;
use crate::cluster::Cluster;
use crate::core::paths;
use crate::defaults::{Defaults, RuntimeDefaults, SshDefaults};
use crate::error::{Error, Result};
use crate::ssh::{self, Connector, RemoteExecutor};
use crate::utils::{command, shell};

use commands::API_SERVER_PORT;
use kubeadm::{JoinSettings, JoinToken, KubeadmConfig};
use registry::RegistryConfig;

/// Lists the addresses of the machine converge runs on.
pub type LocalAddresses = Arc<dyn Fn() -> Result<Vec<String>> + Send + Sync>;

pub struct NodeOrchestrator {
    connector: Arc<dyn Connector>,
    runtime: RuntimeDefaults,
    ssh: SshDefaults,
    kubeadm: Option<KubeadmConfig>,
    local_addresses: LocalAddresses,
}

struct JoinShared {
    connector: Arc<dyn Connector>,
    cluster: Cluster,
    vip: String,
    commands: Vec<String>,
}

struct DeleteShared {
    connector: Arc<dyn Connector>,
    cluster: Cluster,
    vip: String,
    master0: Option<String>,
    cleanup: Vec<String>,
    local_addresses: Option<Vec<String>>,
    remote_extra: String,
    local_extra: Option<String>,
}

impl NodeOrchestrator {
    pub fn new(connector: Arc<dyn Connector>, defaults: &Defaults) -> Self {
        Self {
            connector,
            runtime: defaults.runtime.clone(),
            ssh: defaults.ssh.clone(),
            kubeadm: None,
            local_addresses: Arc::new(local_host_addresses),
        }
    }

    pub fn with_kubeadm_config(mut self, kubeadm: Option<KubeadmConfig>) -> Self {
        self.kubeadm = kubeadm;
        self
    }

    pub fn with_local_addresses(mut self, local_addresses: LocalAddresses) -> Self {
        self.local_addresses = local_addresses;
        self
    }

    /// Cluster rootfs; the same path locally and on every host.
    pub fn rootfs(&self, cluster: &Cluster) -> String {
        paths::cluster_rootfs(&self.runtime.rootfs_base, cluster.name())
    }

    /// Join `ips` to the cluster as workers.
    ///
    /// The probed cgroup driver is cached on `cluster.status`.
    pub fn join_nodes(&self, cluster: &mut Cluster, ips: &[String]) -> Result<()> {
        if ips.is_empty() {
            return Ok(());
        }
        let master0 = cluster.master0().ok_or_else(|| {
            Error::validation_invalid_argument(
                "cluster",
                "joining nodes requires at least one master",
                Some(cluster.name().to_string()),
                None,
            )
        })?;
        let vip = self.runtime.vip.clone();

        let mut settings = JoinSettings::merge(
            self.kubeadm.as_ref(),
            format!("{}:{}", vip, API_SERVER_PORT),
            &cluster.spec.image,
        );

        ssh::wait_ssh_ready(
            self.connector.as_ref(),
            cluster,
            ips,
            self.ssh.ready_attempts,
            Duration::from_secs(self.ssh.ready_interval_secs),
        )
        .map_err(|e| e.with_context("join nodes wait for ssh ready"))?;

        if settings.cgroup_driver.is_none() {
            settings.cgroup_driver = Some(self.cgroup_driver(cluster, &ips[0])?);
        }

        let rootfs = self.rootfs(cluster);
        let registry = RegistryConfig::load(Path::new(&rootfs), &master0, &self.runtime)?;
        self.send_registry_cert(cluster, ips, &registry, Path::new(&rootfs))?;

        let token = self.join_token(cluster, &master0)?;
        let join_config = kubeadm::render_join_config(&settings, &token)?;
        let lvscare = lvscare::static_pod_yaml(&vip, &cluster.master_ips(), "")?;

        let mut registry_cmd = commands::add_etc_host(&registry.ip, &registry.domain);
        if let Some((user, pass)) = registry.credentials() {
            registry_cmd = format!(
                "{} && {}",
                registry_cmd,
                commands::docker_login(&registry.endpoint(), user, pass)
            );
        }

        let shared = Arc::new(JoinShared {
            connector: Arc::clone(&self.connector),
            cluster: cluster.clone(),
            commands: vec![
                registry_cmd,
                shell::write_file_command(&join_config, &commands::join_config_path(&rootfs)),
                commands::add_etc_host(&vip, &self.runtime.apiserver_domain),
                commands::ipvs_add(&vip, &cluster.master_ips()),
                commands::kubeadm_join(&rootfs, self.runtime.kubeadm_verbosity),
                commands::STATIC_POD_MKDIR.to_string(),
                shell::write_file_command(&lvscare, commands::LVSCARE_MANIFEST),
            ],
            vip,
        });

        batch::run_per_host("join", ips, move |ip| {
            log_status!("join", "Start to join {} as worker", ip);
            let session = shared.connector.connect(ip, &shared.cluster)?;
            ensure_vip_route(session.as_ref(), &shared.vip, ip)?;
            session.cmd_async(&shared.commands)?;
            log_status!("join", "Succeeded in joining {} as worker", ip);
            Ok(())
        })
    }

    /// Reset `ips` and remove them from the control plane.
    pub fn delete_nodes(&self, cluster: &Cluster, ips: &[String]) -> Result<()> {
        if ips.is_empty() {
            return Ok(());
        }
        let master0 = cluster.master0();
        let rootfs = self.rootfs(cluster);
        let domain = &self.runtime.apiserver_domain;

        let registry_host = match &master0 {
            Some(m) => {
                let registry = RegistryConfig::load(Path::new(&rootfs), m, &self.runtime)?;
                format!("{} {}", registry.ip, registry.domain)
            }
            None => self.runtime.registry_domain.clone(),
        };

        let local_addresses = match (self.local_addresses)() {
            Ok(addresses) => Some(addresses),
            Err(err) => {
                log_status!(
                    "delete",
                    "Could not resolve local addresses, treating all nodes as remote: {}",
                    err.message
                );
                None
            }
        };

        let shared = Arc::new(DeleteShared {
            connector: Arc::clone(&self.connector),
            cluster: cluster.clone(),
            vip: self.runtime.vip.clone(),
            cleanup: vec![
                commands::clean_node(self.runtime.kubeadm_verbosity),
                commands::remove_etc_host(&registry_host),
                commands::remove_etc_host(domain),
            ],
            local_extra: master0.as_ref().map(|m| commands::add_etc_host(m, domain)),
            remote_extra: commands::REMOVE_KUBE_CONFIG.to_string(),
            master0,
            local_addresses,
        });

        batch::run_per_host("delete", ips, move |ip| {
            log_status!("delete", "Start to delete worker {}", ip);
            let session = shared.connector.connect(ip, &shared.cluster)?;

            let is_local = shared
                .local_addresses
                .as_ref()
                .is_some_and(|addresses| addresses.iter().any(|a| a == ip));
            let mut cleanup = shared.cleanup.clone();
            match (&shared.local_extra, is_local) {
                (Some(re_add), true) => cleanup.push(re_add.clone()),
                // No master0 means no API server entry to restore. The
                // executing host keeps its kube config either way.
                (None, true) => {}
                (_, false) => cleanup.push(shared.remote_extra.clone()),
            }
            session.cmd_async(&cleanup)?;

            if let Err(err) = session.cmd(&commands::route_del(&shared.vip, ip)) {
                log_status!("delete", "Failed to delete VIP route on {}: {}", ip, err.message);
            }

            if let Some(master0) = &shared.master0 {
                let master = shared.connector.connect(master0, &shared.cluster)?;
                let hostname = resolve_hostname(master.as_ref(), ip)?;
                master.cmd_async(&[commands::kubectl_delete_node(&hostname)])?;
            }

            log_status!("delete", "Succeeded in deleting worker {}", ip);
            Ok(())
        })
    }

    fn cgroup_driver(&self, cluster: &mut Cluster, ip: &str) -> Result<String> {
        if let Some(cached) = &cluster.status.cgroup_driver {
            return Ok(cached.clone());
        }

        let session = self.connector.connect(ip, cluster)?;
        let output = session.cmd_to_string(commands::CGROUP_DRIVER_PROBE)?;
        let driver = kubeadm::parse_cgroup_driver(&output)
            .unwrap_or_else(|| kubeadm::DEFAULT_CGROUP_DRIVER.to_string());
        log_status!("join", "Using cgroup driver {} (probed on {})", driver, ip);

        cluster.status.cgroup_driver = Some(driver.clone());
        Ok(driver)
    }

    fn send_registry_cert(
        &self,
        cluster: &Cluster,
        ips: &[String],
        registry: &RegistryConfig,
        rootfs: &Path,
    ) -> Result<()> {
        let cert: PathBuf = registry.local_cert(rootfs);
        if !cert.exists() {
            log_status!(
                "join",
                "No registry certificate at {}, skipping distribution",
                cert.display()
            );
            return Ok(());
        }

        let connector = Arc::clone(&self.connector);
        let cluster = cluster.clone();
        let remote = registry.remote_cert();
        batch::run_per_host("send registry cert", ips, move |ip| {
            connector.connect(ip, &cluster)?.copy(&cert, &remote)
        })
    }

    fn join_token(&self, cluster: &Cluster, master0: &str) -> Result<JoinToken> {
        let master = self.connector.connect(master0, cluster)?;
        let output = master
            .cmd_to_string(commands::JOIN_COMMAND_PRINT)
            .map_err(|e| e.with_context("get join token"))?;
        let mut token = JoinToken::parse_join_command(&output)?;

        match master.cmd_to_string(commands::UPLOAD_CERTS) {
            Ok(output) => token.certificate_key = kubeadm::parse_certificate_key(&output),
            Err(err) => {
                log_status!("join", "Could not upload certificates on {}: {}", master0, err.message)
            }
        }
        Ok(token)
    }
}

/// Add a host route for the VIP through `ip` unless `seautil` reports one.
///
/// Returns true when a route was added.
pub fn ensure_vip_route(session: &dyn RemoteExecutor, vip: &str, ip: &str) -> Result<bool> {
    let result = session
        .cmd_to_string(&commands::route_check(ip))
        .map_err(|e| e.with_context("failed to check multi network"))?;
    if result.trim().eq_ignore_ascii_case(commands::ROUTE_OK) {
        return Ok(false);
    }
    session.cmd(&commands::route_add(vip, ip))?;
    Ok(true)
}

/// Find the node name whose INTERNAL-IP is `ip`, querying through `master`.
pub fn resolve_hostname(master: &dyn RemoteExecutor, ip: &str) -> Result<String> {
    let output = master.cmd_to_string(commands::LIST_NODES_WIDE)?;
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match (fields.first(), fields.get(5)) {
                (Some(name), Some(internal_ip)) if *internal_ip == ip => Some(name.to_string()),
                _ => None,
            }
        })
        .next()
        .ok_or_else(|| Error::node_hostname_not_found(ip, master.host()))
}

/// Addresses of this machine, from `hostname -I`.
pub fn local_host_addresses() -> Result<Vec<String>> {
    let output = command::run("hostname", &["-I"], "resolve local addresses")?;
    let mut addresses: Vec<String> = output.split_whitespace().map(str::to_string).collect();
    addresses.push("127.0.0.1".to_string());
    Ok(addresses)
}
