use std::sync::Arc;

use crate::cluster::Cluster;
use crate::collab::{ClusterSource, Filesystem, Guest};
use crate::config_render::{Config, Configuration};
use crate::error::Result;
use crate::pipeline::{Processor, Stage};
use crate::plugin::{Phase, PluginRegistry, PluginSet};

/// Render configs, ship the rootfs, then install the guest between the
/// `PreGuest` and `PostInstall` plugin phases.
pub struct InstallProcessor {
    configs: Vec<Config>,
    configuration: Configuration,
    filesystem: Box<dyn Filesystem>,
    guest: Box<dyn Guest>,
    plugins: PluginSet,
}

impl InstallProcessor {
    pub fn new(
        source: &dyn ClusterSource,
        configuration: Configuration,
        filesystem: Box<dyn Filesystem>,
        guest: Box<dyn Guest>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            configs: source.configs(),
            configuration,
            filesystem,
            guest,
            plugins: PluginSet::new(registry, source.plugins()),
        }
    }

    fn run_config(&mut self, _cluster: &mut Cluster) -> Result<()> {
        self.configuration.dump(&self.configs)
    }

    fn mount_rootfs(&mut self, cluster: &mut Cluster) -> Result<()> {
        let hosts = cluster.all_ips();
        self.filesystem.mount_rootfs(cluster, &hosts, false)
    }

    fn pre_guest_plugins(&mut self, cluster: &mut Cluster) -> Result<()> {
        self.plugins.load()?;
        self.plugins.run(cluster, Phase::PreGuest)
    }

    fn install(&mut self, cluster: &mut Cluster) -> Result<()> {
        self.guest.apply(cluster)
    }

    fn post_install_plugins(&mut self, cluster: &mut Cluster) -> Result<()> {
        self.plugins.run(cluster, Phase::PostInstall)
    }
}

impl Processor for InstallProcessor {
    fn pipeline(&self) -> Vec<Stage<Self>> {
        vec![
            Stage::new("run config", Self::run_config),
            Stage::new("mount rootfs", Self::mount_rootfs),
            Stage::new("pre-guest plugins", Self::pre_guest_plugins),
            Stage::new("install", Self::install),
            Stage::new("post-install plugins", Self::post_install_plugins),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusterfile::ClusterFile;
    use crate::core::test_support::{self, FakeConnector};
    use crate::error::Error;
    use crate::plugin::{Plugin, SHELL};
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct RecordingFs(Journal);

    impl Filesystem for RecordingFs {
        fn mount_rootfs(&self, _: &Cluster, hosts: &[String], init: bool) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .push(format!("mount {} init={}", hosts.join(","), init));
            Ok(())
        }
    }

    struct RecordingGuest {
        journal: Journal,
        fail: bool,
    }

    impl Guest for RecordingGuest {
        fn apply(&self, cluster: &Cluster) -> Result<()> {
            self.journal.lock().unwrap().push(format!("guest {}", cluster.name()));
            if self.fail {
                return Err(Error::internal_unexpected("guest failed"));
            }
            Ok(())
        }
    }

    fn processor(
        dir: &std::path::Path,
        fake: &FakeConnector,
        journal: &Journal,
        fail_guest: bool,
    ) -> (InstallProcessor, Cluster) {
        let cluster = test_support::cluster(&["10.0.0.1"], &["10.0.0.2"]);
        let mut file = ClusterFile::new(cluster.clone());
        file.configs.push(Config::new("app", "etc/app.yaml", "replicas: 3\n"));
        file.plugins.push(Plugin::new("pre", SHELL, Phase::PreGuest, "echo pre"));
        file.plugins.push(Plugin::new("post", SHELL, Phase::PostInstall, "echo post"));

        let registry = Arc::new(PluginRegistry::with_builtin(
            Arc::new(fake.clone()),
            "/var/lib/converge/data",
        ));
        let processor = InstallProcessor::new(
            &file,
            Configuration::new(dir),
            Box::new(RecordingFs(Arc::clone(journal))),
            Box::new(RecordingGuest {
                journal: Arc::clone(journal),
                fail: fail_guest,
            }),
            registry,
        );
        (processor, cluster)
    }

    #[test]
    fn stages_run_in_install_order() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeConnector::new();
        let journal = Journal::default();
        let (mut processor, mut cluster) = processor(dir.path(), &fake, &journal, false);

        processor.execute(&mut cluster).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("etc/app.yaml")).unwrap(),
            "replicas: 3\n"
        );
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["mount 10.0.0.1,10.0.0.2 init=false", "guest test"]
        );
        let on_master = fake.commands_for("10.0.0.1");
        assert_eq!(on_master.len(), 2);
        assert!(on_master[0].ends_with("echo pre"));
        assert!(on_master[1].ends_with("echo post"));
    }

    #[test]
    fn failed_install_skips_post_install_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeConnector::new();
        let journal = Journal::default();
        let (mut processor, mut cluster) = processor(dir.path(), &fake, &journal, true);

        let err = processor.execute(&mut cluster).unwrap_err();

        assert_eq!(err.message, "guest failed");
        assert!(fake.all_commands().iter().all(|c| !c.contains("echo post")));
        assert!(fake.all_commands().iter().any(|c| c.contains("echo pre")));
    }
}
