//! Adopt a running cluster: synthesize its descriptor, then bring the
//! rootfs and registry up to date on every host.

use std::path::{Path, PathBuf};

use super::handle;
use crate::cluster::{Cluster, Host, SshConfig, MASTER, NODE};
use crate::clusterfile::ClusterFile;
use crate::collab::{Filesystem, ImageMounter, ImageService, KubeClient, RegistryRuntime};
use crate::core::paths;
use crate::defaults::RuntimeDefaults;
use crate::error::Result;
use crate::node::registry::RegistryConfig;
use crate::pipeline::{Processor, Stage};

pub const MASTER_LABEL: &str = "node-role.kubernetes.io/master";

/// Connection details for the descriptor built by [`generate_cluster`].
#[derive(Debug, Clone, Default)]
pub struct GenerateArgs {
    pub name: String,
    pub image: String,
    pub passwd: Option<String>,
    pub port: Option<u16>,
    pub pk: Option<String>,
    pub pk_passwd: Option<String>,
}

/// Build a cluster descriptor from the nodes a live cluster reports.
///
/// Nodes carrying the master label form the master group, every other
/// node the worker group. Only internal IPs are considered.
pub fn generate_cluster(args: &GenerateArgs, kube: &dyn KubeClient) -> Result<Cluster> {
    let mut masters = Vec::new();
    let mut nodes = Vec::new();

    for node in kube.list_nodes()? {
        let Some(ip) = node.internal_ip else {
            log_status!("generate", "Node {} reports no internal IP, skipping", node.name);
            continue;
        };
        if node.labels.contains_key(MASTER_LABEL) {
            masters.push(ip);
        } else {
            nodes.push(ip);
        }
    }

    let mut cluster = Cluster::new(
        args.name.clone(),
        args.image.clone(),
        vec![
            Host::new(masters, vec![MASTER.to_string()]),
            Host::new(nodes, vec![NODE.to_string()]),
        ],
    );
    cluster.spec.ssh = SshConfig {
        user: None,
        passwd: args.passwd.clone(),
        pk: args.pk.clone(),
        pk_passwd: args.pk_passwd.clone(),
        port: args.port,
    };
    Ok(cluster)
}

/// Builds the handles the generate pipeline needs once the descriptor is
/// persisted.
pub trait GenerateToolkit: Send + Sync {
    fn runtime(&self, cluster: &Cluster) -> Result<Box<dyn RegistryRuntime>>;
    fn filesystem(&self, cluster: &Cluster) -> Result<Box<dyn Filesystem>>;
}

pub struct GenerateProcessor {
    image_service: Box<dyn ImageService>,
    mounter: Box<dyn ImageMounter>,
    toolkit: Box<dyn GenerateToolkit>,
    runtime_defaults: RuntimeDefaults,
    clusterfile: Option<PathBuf>,
    runtime: Option<Box<dyn RegistryRuntime>>,
    filesystem: Option<Box<dyn Filesystem>>,
}

impl GenerateProcessor {
    pub fn new(
        image_service: Box<dyn ImageService>,
        mounter: Box<dyn ImageMounter>,
        toolkit: Box<dyn GenerateToolkit>,
        runtime_defaults: RuntimeDefaults,
    ) -> Self {
        Self {
            image_service,
            mounter,
            toolkit,
            runtime_defaults,
            clusterfile: None,
            runtime: None,
            filesystem: None,
        }
    }

    /// Persist somewhere other than `~/.converge/<name>/Clusterfile`.
    pub fn with_clusterfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.clusterfile = Some(path.into());
        self
    }

    fn persist(&mut self, cluster: &mut Cluster) -> Result<()> {
        let path = match &self.clusterfile {
            Some(path) => path.clone(),
            None => paths::cluster_file(cluster.name())?,
        };
        ClusterFile::new(cluster.clone()).save(&path)?;
        log_status!("generate", "Saved cluster file to {}", path.display());
        Ok(())
    }

    fn init(&mut self, cluster: &mut Cluster) -> Result<()> {
        self.runtime = Some(self.toolkit.runtime(cluster)?);
        self.filesystem = Some(self.toolkit.filesystem(cluster)?);
        Ok(())
    }

    fn mount_image(&mut self, cluster: &mut Cluster) -> Result<()> {
        self.image_service.pull_if_not_exist(&cluster.spec.image)?;
        self.mounter.mount_image(cluster)
    }

    fn mount_rootfs(&mut self, cluster: &mut Cluster) -> Result<()> {
        let mut hosts = cluster.all_ips();
        if let Some(registry_ip) = self.registry_ip(cluster)? {
            if !hosts.contains(&registry_ip) {
                hosts.push(registry_ip);
            }
        }
        handle(&self.filesystem, "mount rootfs")?.mount_rootfs(cluster, &hosts, false)
    }

    fn apply_registry(&mut self, _cluster: &mut Cluster) -> Result<()> {
        let runtime = handle(&self.runtime, "apply registry")?;
        runtime.generate_registry_cert()?;
        runtime.apply_registry()
    }

    fn unmount_image(&mut self, cluster: &mut Cluster) -> Result<()> {
        self.mounter.unmount_image(cluster)
    }

    fn registry_ip(&self, cluster: &Cluster) -> Result<Option<String>> {
        let Some(master0) = cluster.master0() else {
            return Ok(None);
        };
        let rootfs = paths::cluster_rootfs(&self.runtime_defaults.rootfs_base, cluster.name());
        let config = RegistryConfig::load(Path::new(&rootfs), &master0, &self.runtime_defaults)?;
        Ok(Some(config.ip))
    }
}

impl Processor for GenerateProcessor {
    fn pipeline(&self) -> Vec<Stage<Self>> {
        vec![
            Stage::new("persist", Self::persist),
            Stage::new("init", Self::init),
            Stage::new("mount image", Self::mount_image),
            Stage::new("mount rootfs", Self::mount_rootfs),
            Stage::new("apply registry", Self::apply_registry),
            Stage::new("unmount image", Self::unmount_image),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::NodeInfo;
    use crate::error::Error;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<String>>>;

    struct StaticKube(Vec<NodeInfo>);

    impl KubeClient for StaticKube {
        fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
            Ok(self.0.clone())
        }
    }

    fn node(name: &str, ip: Option<&str>, master: bool) -> NodeInfo {
        let mut labels = BTreeMap::new();
        if master {
            labels.insert(MASTER_LABEL.to_string(), String::new());
        }
        NodeInfo {
            name: name.to_string(),
            labels,
            internal_ip: ip.map(str::to_string),
        }
    }

    #[test]
    fn descriptor_groups_nodes_by_master_label() {
        let kube = StaticKube(vec![
            node("m1", Some("10.0.0.1"), true),
            node("w1", Some("10.0.0.2"), false),
            node("w2", None, false),
            node("m2", Some("10.0.0.5"), true),
        ]);
        let args = GenerateArgs {
            name: "adopted".to_string(),
            image: "kubernetes:v1.19.8".to_string(),
            passwd: Some("secret".to_string()),
            port: Some(2222),
            ..Default::default()
        };

        let cluster = generate_cluster(&args, &kube).unwrap();

        assert_eq!(cluster.master_ips(), vec!["10.0.0.1", "10.0.0.5"]);
        assert_eq!(cluster.node_ips(), vec!["10.0.0.2"]);
        assert_eq!(cluster.spec.ssh.passwd.as_deref(), Some("secret"));
        assert_eq!(cluster.spec.ssh.port, Some(2222));
        assert_eq!(cluster.kind, crate::cluster::KIND);
    }

    struct Recording {
        journal: Journal,
        fail_apply: bool,
    }

    impl ImageService for Recording {
        fn pull_if_not_exist(&self, image: &str) -> Result<()> {
            self.journal.lock().unwrap().push(format!("pull {}", image));
            Ok(())
        }
    }

    impl ImageMounter for Recording {
        fn mount_image(&self, _: &Cluster) -> Result<()> {
            self.journal.lock().unwrap().push("mount image".to_string());
            Ok(())
        }

        fn unmount_image(&self, _: &Cluster) -> Result<()> {
            self.journal.lock().unwrap().push("unmount image".to_string());
            Ok(())
        }
    }

    impl Filesystem for Recording {
        fn mount_rootfs(&self, _: &Cluster, hosts: &[String], init: bool) -> Result<()> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("mount rootfs {} init={}", hosts.join(","), init));
            Ok(())
        }
    }

    impl RegistryRuntime for Recording {
        fn generate_registry_cert(&self) -> Result<()> {
            self.journal.lock().unwrap().push("registry cert".to_string());
            Ok(())
        }

        fn apply_registry(&self) -> Result<()> {
            self.journal.lock().unwrap().push("apply registry".to_string());
            if self.fail_apply {
                return Err(Error::internal_unexpected("registry down"));
            }
            Ok(())
        }
    }

    struct Toolkit {
        journal: Journal,
        fail_apply: bool,
    }

    impl Toolkit {
        fn recording(&self) -> Recording {
            Recording {
                journal: Arc::clone(&self.journal),
                fail_apply: self.fail_apply,
            }
        }
    }

    impl GenerateToolkit for Toolkit {
        fn runtime(&self, _: &Cluster) -> Result<Box<dyn RegistryRuntime>> {
            self.journal.lock().unwrap().push("init runtime".to_string());
            Ok(Box::new(self.recording()))
        }

        fn filesystem(&self, _: &Cluster) -> Result<Box<dyn Filesystem>> {
            Ok(Box::new(self.recording()))
        }
    }

    fn generate(
        base: &Path,
        journal: &Journal,
        fail_apply: bool,
    ) -> (GenerateProcessor, PathBuf) {
        let toolkit = Toolkit {
            journal: Arc::clone(journal),
            fail_apply,
        };
        let runtime = RuntimeDefaults {
            rootfs_base: base.to_string_lossy().to_string(),
            ..Default::default()
        };
        let clusterfile = base.join("state").join("Clusterfile");
        let processor = GenerateProcessor::new(
            Box::new(toolkit.recording()),
            Box::new(toolkit.recording()),
            Box::new(toolkit),
            runtime,
        )
        .with_clusterfile(&clusterfile);
        (processor, clusterfile)
    }

    fn cluster() -> Cluster {
        Cluster::new(
            "adopted",
            "kubernetes:v1.19.8",
            vec![
                Host::new(vec!["10.0.0.1".to_string()], vec![MASTER.to_string()]),
                Host::new(vec!["10.0.0.2".to_string()], vec![NODE.to_string()]),
            ],
        )
    }

    #[test]
    fn pipeline_persists_then_runs_in_order() {
        let base = tempfile::tempdir().unwrap();
        let journal = Journal::default();
        let (mut processor, clusterfile) = generate(base.path(), &journal, false);
        let mut cluster = cluster();

        processor.execute(&mut cluster).unwrap();

        let saved = ClusterFile::load(&clusterfile).unwrap();
        assert_eq!(saved.cluster, cluster);
        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "init runtime",
                "pull kubernetes:v1.19.8",
                "mount image",
                "mount rootfs 10.0.0.1,10.0.0.2 init=false",
                "registry cert",
                "apply registry",
                "unmount image",
            ]
        );
    }

    #[test]
    fn registry_host_outside_the_cluster_gets_the_rootfs() {
        let base = tempfile::tempdir().unwrap();
        let etc = base.path().join("adopted/rootfs/etc");
        std::fs::create_dir_all(&etc).unwrap();
        std::fs::write(etc.join("registry.yml"), "ip: 10.0.0.9\n").unwrap();
        let journal = Journal::default();
        let (mut processor, _) = generate(base.path(), &journal, false);

        processor.execute(&mut cluster()).unwrap();

        assert!(journal
            .lock()
            .unwrap()
            .contains(&"mount rootfs 10.0.0.1,10.0.0.2,10.0.0.9 init=false".to_string()));
    }

    #[test]
    fn failed_registry_leaves_image_mounted() {
        let base = tempfile::tempdir().unwrap();
        let journal = Journal::default();
        let (mut processor, _) = generate(base.path(), &journal, true);

        let err = processor.execute(&mut cluster()).unwrap_err();

        assert_eq!(err.message, "registry down");
        assert!(!journal.lock().unwrap().contains(&"unmount image".to_string()));
    }
}
