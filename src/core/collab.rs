//! Collaborator seams the pipelines drive but do not implement in full.
//!
//! Image storage, image mounting and registry provisioning are left to the
//! embedding application. The adapters here cover what the CLI needs:
//! shipping a prepared rootfs over scp, running the guest commands on
//! master0, and listing nodes through `kubectl`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::batch;
use crate::cluster::Cluster;
use crate::core::paths;
use crate::error::{Error, Result};
use crate::ssh::Connector;
use crate::utils::{command, shell};

pub use crate::clusterfile::ClusterSource;

pub trait ImageService: Send + Sync {
    fn pull_if_not_exist(&self, image: &str) -> Result<()>;
}

pub trait ImageMounter: Send + Sync {
    fn mount_image(&self, cluster: &Cluster) -> Result<()>;
    fn unmount_image(&self, cluster: &Cluster) -> Result<()>;
}

/// Distributes the cluster rootfs to hosts.
pub trait Filesystem: Send + Sync {
    fn mount_rootfs(&self, cluster: &Cluster, hosts: &[String], init: bool) -> Result<()>;
}

/// Installs the application layer once the rootfs is in place.
pub trait Guest: Send + Sync {
    fn apply(&self, cluster: &Cluster) -> Result<()>;
}

pub trait RegistryRuntime: Send + Sync {
    fn generate_registry_cert(&self) -> Result<()>;
    fn apply_registry(&self) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub internal_ip: Option<String>,
}

pub trait KubeClient: Send + Sync {
    fn list_nodes(&self) -> Result<Vec<NodeInfo>>;
}

// ============================================================================
// Filesystem over scp
// ============================================================================

pub struct ScpFilesystem {
    connector: Arc<dyn Connector>,
    rootfs_base: String,
}

impl ScpFilesystem {
    pub fn new(connector: Arc<dyn Connector>, rootfs_base: impl Into<String>) -> Self {
        Self {
            connector,
            rootfs_base: rootfs_base.into(),
        }
    }
}

impl Filesystem for ScpFilesystem {
    fn mount_rootfs(&self, cluster: &Cluster, hosts: &[String], init: bool) -> Result<()> {
        let rootfs = paths::cluster_rootfs(&self.rootfs_base, cluster.name());
        let local = PathBuf::from(&rootfs);
        if !local.exists() {
            return Err(Error::validation_invalid_argument(
                "rootfs",
                "cluster rootfs has not been prepared locally",
                Some(rootfs),
                None,
            ));
        }

        let init_script = format!(
            "cd {} && if [ -f scripts/init.sh ]; then sh scripts/init.sh; fi",
            shell::quote_path(&rootfs)
        );
        let connector = Arc::clone(&self.connector);
        let cluster = cluster.clone();

        batch::run_per_host("mount rootfs", hosts, move |ip| {
            let session = connector.connect(ip, &cluster)?;
            session.copy(&local, &rootfs)?;
            if init {
                session.cmd_async(std::slice::from_ref(&init_script))?;
            }
            Ok(())
        })
    }
}

// ============================================================================
// Guest running spec.cmd on master0
// ============================================================================

pub struct ShellGuest {
    connector: Arc<dyn Connector>,
    rootfs_base: String,
}

impl ShellGuest {
    pub fn new(connector: Arc<dyn Connector>, rootfs_base: impl Into<String>) -> Self {
        Self {
            connector,
            rootfs_base: rootfs_base.into(),
        }
    }
}

impl Guest for ShellGuest {
    fn apply(&self, cluster: &Cluster) -> Result<()> {
        let Some(master0) = cluster.master0() else {
            return Err(Error::validation_invalid_argument(
                "spec.hosts",
                "cluster has no master to install on",
                Some(cluster.name().to_string()),
                None,
            ));
        };
        if cluster.spec.cmd.is_empty() {
            log_status!("guest", "No install commands declared for {}", cluster.name());
            return Ok(());
        }

        let rootfs = paths::cluster_rootfs(&self.rootfs_base, cluster.name());
        let commands: Vec<String> = cluster
            .spec
            .cmd
            .iter()
            .map(|cmd| {
                crate::env::wrap_command(
                    cluster,
                    &master0,
                    &format!("cd {} && {}", shell::quote_path(&rootfs), cmd),
                )
            })
            .collect();

        log_status!("guest", "Installing {} on {}", cluster.spec.image, master0);
        self.connector
            .connect(&master0, cluster)?
            .cmd_async(&commands)
    }
}

// ============================================================================
// kubectl-backed node listing
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct KubectlClient {
    pub kubeconfig: Option<String>,
}

#[derive(Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<NodeItem>,
}

#[derive(Deserialize)]
struct NodeItem {
    metadata: NodeMeta,
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Deserialize)]
struct NodeMeta {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Default)]
struct NodeStatus {
    #[serde(default)]
    addresses: Vec<NodeAddress>,
}

#[derive(Deserialize)]
struct NodeAddress {
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

/// Parse `kubectl get nodes -o json` output.
pub fn parse_node_list(json: &str) -> Result<Vec<NodeInfo>> {
    let list: NodeList = serde_json::from_str(json)
        .map_err(|e| Error::internal_json(e.to_string(), Some("parse node list".to_string())))?;

    Ok(list
        .items
        .into_iter()
        .map(|item| NodeInfo {
            internal_ip: item
                .status
                .addresses
                .into_iter()
                .find(|a| a.kind == "InternalIP")
                .map(|a| a.address),
            name: item.metadata.name,
            labels: item.metadata.labels,
        })
        .collect())
}

impl KubeClient for KubectlClient {
    fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let mut args = vec!["get", "nodes", "-o", "json"];
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push("--kubeconfig");
            args.push(kubeconfig);
        }
        let output = command::run("kubectl", &args, "kubectl get nodes")?;
        parse_node_list(&output)
    }
}
