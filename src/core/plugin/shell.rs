use std::sync::Arc;

use super::{resolve_selector, Phase, PluginContext, PluginHandler};
use crate::core::paths;
use crate::env;
use crate::error::Result;
use crate::ssh::Connector;

pub const SHELL: &str = "SHELL";

/// Runs a plugin's `data` as a shell command on its target hosts.
///
/// Hosts run one after another; the first failure aborts the rest.
pub struct ShellPlugin {
    connector: Arc<dyn Connector>,
    rootfs_base: String,
}

impl ShellPlugin {
    pub fn new(connector: Arc<dyn Connector>, rootfs_base: impl Into<String>) -> Self {
        Self {
            connector,
            rootfs_base: rootfs_base.into(),
        }
    }
}

impl PluginHandler for ShellPlugin {
    fn run(&self, ctx: &PluginContext, phase: Phase) -> Result<()> {
        let plugin = ctx.plugin;
        if plugin.spec.plugin_type != SHELL || !plugin.runs_at(phase) {
            return Ok(());
        }

        let command = if phase == Phase::Originally {
            plugin.spec.data.clone()
        } else {
            let rootfs = paths::cluster_rootfs(&self.rootfs_base, ctx.cluster.name());
            format!("cd {} && {}", rootfs, plugin.spec.data)
        };

        let hosts = match plugin.spec.on.as_deref() {
            Some(on) if !on.trim().is_empty() => resolve_selector(on, ctx.cluster)?,
            _ => ctx.cluster.all_ips(),
        };

        for ip in &hosts {
            log_status!("plugin", "{} ({}) on {}", plugin.name(), phase, ip);
            let wrapped = env::wrap_command(ctx.cluster, ip, &command);
            self.connector
                .connect(ip, ctx.cluster)
                .and_then(|session| session.cmd_async(&[wrapped]))
                .map_err(|e| {
                    e.with_context(format!(
                        "plugin {} (type {}, phase {}) on {}",
                        plugin.name(),
                        SHELL,
                        phase,
                        ip
                    ))
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{self, FakeConnector};
    use crate::cluster::{Host, NODE};
    use crate::plugin::{Plugin, PluginRegistry, PluginSet};

    fn run_one(fake: &FakeConnector, plugin: Plugin, phase: Phase) -> Result<()> {
        let mut cluster = test_support::cluster(&["10.0.0.1"], &["10.0.0.2", "10.0.0.3"]);
        cluster.metadata.name = "prod".to_string();
        let registry = Arc::new(PluginRegistry::with_builtin(
            Arc::new(fake.clone()),
            "/var/lib/converge/data",
        ));
        let mut set = PluginSet::new(registry, vec![plugin]);
        set.load()?;
        set.run(&cluster, phase)
    }

    #[test]
    fn runs_in_rootfs_on_every_host_by_default() {
        let fake = FakeConnector::new();
        run_one(
            &fake,
            Plugin::new("sysctl", SHELL, Phase::PreGuest, "sh sysctl.sh"),
            Phase::PreGuest,
        )
        .unwrap();

        let expected = "cd /var/lib/converge/data/prod/rootfs && sh sysctl.sh".to_string();
        assert_eq!(
            fake.log(),
            vec![
                ("10.0.0.1".to_string(), expected.clone()),
                ("10.0.0.2".to_string(), expected.clone()),
                ("10.0.0.3".to_string(), expected),
            ]
        );
    }

    #[test]
    fn originally_phase_runs_command_verbatim_on_selected_hosts() {
        let fake = FakeConnector::new();
        run_one(
            &fake,
            Plugin::new("hostname", SHELL, Phase::Originally, "hostnamectl").on("role=node"),
            Phase::Originally,
        )
        .unwrap();

        assert_eq!(fake.commands_for("10.0.0.1"), Vec::<String>::new());
        assert_eq!(fake.commands_for("10.0.0.2"), vec!["hostnamectl"]);
        assert_eq!(fake.commands_for("10.0.0.3"), vec!["hostnamectl"]);
    }

    #[test]
    fn post_join_role_selector_resolves_after_nodes_join() {
        let fake = FakeConnector::new();
        let mut cluster = test_support::cluster(&["10.0.0.1"], &[]);
        let registry = Arc::new(PluginRegistry::with_builtin(
            Arc::new(fake.clone()),
            "/var/lib/converge/data",
        ));
        let plugin = Plugin::new("label", SHELL, Phase::PostJoin, "kubectl label").on("role=node");
        let mut set = PluginSet::new(registry, vec![plugin]);

        set.load().unwrap();
        set.run(&cluster, Phase::PreJoin).unwrap();
        let err = set.run(&cluster, Phase::PostJoin).unwrap_err();
        assert_eq!(err.code.as_str(), "plugin.invalid_selector");

        cluster
            .spec
            .hosts
            .push(Host::new(vec!["10.0.0.2".to_string()], vec![NODE.to_string()]));
        set.run(&cluster, Phase::PostJoin).unwrap();

        assert!(fake.commands_for("10.0.0.1").is_empty());
        assert_eq!(fake.commands_for("10.0.0.2").len(), 1);
    }

    #[test]
    fn host_failure_aborts_remaining_hosts_with_context() {
        let fake = FakeConnector::new().fail_on("10.0.0.2", "install.sh");
        let err = run_one(
            &fake,
            Plugin::new("deps", SHELL, Phase::PostInstall, "sh install.sh"),
            Phase::PostInstall,
        )
        .unwrap_err();

        assert_eq!(err.code.as_str(), "remote.command_failed");
        assert!(err.message.contains("plugin deps"));
        assert!(err.message.contains("PostInstall"));
        assert!(err.message.contains("10.0.0.2"));
        assert!(fake.commands_for("10.0.0.3").is_empty());
    }
}
