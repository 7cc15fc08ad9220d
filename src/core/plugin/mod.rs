//! Phase-scoped plugin dispatch.
//!
//! Every handler in the registry sees every plugin at every phase and
//! filters for itself: a handler ignores plugins whose type is not its own
//! or whose action names a different phase. Handlers run in registration
//! order, plugins in declaration order.

mod selector;
mod shell;

pub use selector::{parse_selector, resolve_selector, Selector};
pub use shell::{ShellPlugin, SHELL};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::cluster::Cluster;
use crate::clusterfile::KIND_PLUGIN;
use crate::error::{Error, Result};
use crate::ssh::Connector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Originally,
    PreGuest,
    PostInstall,
    PreJoin,
    PostJoin,
    PreClean,
    PostClean,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Originally,
        Phase::PreGuest,
        Phase::PostInstall,
        Phase::PreJoin,
        Phase::PostJoin,
        Phase::PreClean,
        Phase::PostClean,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Originally => "Originally",
            Phase::PreGuest => "PreGuest",
            Phase::PostInstall => "PostInstall",
            Phase::PreJoin => "PreJoin",
            Phase::PostJoin => "PostJoin",
            Phase::PreClean => "PreClean",
            Phase::PostClean => "PostClean",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Phase::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| {
                Error::validation_invalid_argument(
                    "action",
                    format!("unknown plugin phase '{}'", s),
                    None,
                    Some(Phase::ALL.iter().map(|p| p.as_str().to_string()).collect()),
                )
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plugin {
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: PluginMetadata,
    pub spec: PluginSpec,
}

fn default_kind() -> String {
    KIND_PLUGIN.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PluginMetadata {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PluginSpec {
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Phase name this plugin runs at.
    pub action: String,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
}

impl Plugin {
    pub fn new(
        name: impl Into<String>,
        plugin_type: impl Into<String>,
        action: Phase,
        data: impl Into<String>,
    ) -> Self {
        Self {
            kind: default_kind(),
            metadata: PluginMetadata { name: name.into() },
            spec: PluginSpec {
                plugin_type: plugin_type.into(),
                action: action.as_str().to_string(),
                data: data.into(),
                on: None,
            },
        }
    }

    pub fn on(mut self, selector: impl Into<String>) -> Self {
        self.spec.on = Some(selector.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// True when this plugin is declared for `phase`.
    pub fn runs_at(&self, phase: Phase) -> bool {
        self.spec.action == phase.as_str()
    }
}

/// Borrowed view handed to a handler for one dispatch.
pub struct PluginContext<'a> {
    pub cluster: &'a Cluster,
    pub plugin: &'a Plugin,
}

pub trait PluginHandler: Send + Sync {
    fn run(&self, ctx: &PluginContext, phase: Phase) -> Result<()>;
}

/// Type tag to handler table, populated once at startup.
#[derive(Default)]
pub struct PluginRegistry {
    handlers: Vec<(String, Box<dyn PluginHandler>)>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `SHELL` handler.
    pub fn with_builtin(connector: Arc<dyn Connector>, rootfs_base: impl Into<String>) -> Self {
        let mut registry = Self::new();
        registry.handlers.push((
            SHELL.to_string(),
            Box::new(ShellPlugin::new(connector, rootfs_base)),
        ));
        registry
    }

    pub fn register(
        &mut self,
        type_tag: impl Into<String>,
        handler: Box<dyn PluginHandler>,
    ) -> Result<()> {
        let type_tag = type_tag.into();
        if self.contains(&type_tag) {
            return Err(Error::plugin_duplicate_type(type_tag));
        }
        self.handlers.push((type_tag, handler));
        Ok(())
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.handlers.iter().any(|(tag, _)| tag == type_tag)
    }

    pub fn types(&self) -> Vec<&str> {
        self.handlers.iter().map(|(tag, _)| tag.as_str()).collect()
    }

    /// Broadcast one plugin to every handler.
    pub fn run(&self, ctx: &PluginContext, phase: Phase) -> Result<()> {
        for (_, handler) in &self.handlers {
            handler.run(ctx, phase)?;
        }
        Ok(())
    }
}

/// The plugins declared for one pipeline run.
pub struct PluginSet {
    registry: Arc<PluginRegistry>,
    plugins: Vec<Plugin>,
    loaded: bool,
}

impl PluginSet {
    pub fn new(registry: Arc<PluginRegistry>, plugins: Vec<Plugin>) -> Self {
        Self {
            registry,
            plugins,
            loaded: false,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Validate every declared plugin.
    ///
    /// Phase names must be known, data non-empty and `on` selectors must
    /// parse. Selectors are resolved against the cluster at dispatch, so a
    /// `PostJoin` plugin may target a role the join is about to create.
    pub fn load(&mut self) -> Result<()> {
        for plugin in &self.plugins {
            let context = format!("plugin '{}'", plugin.name());
            Phase::from_str(&plugin.spec.action).map_err(|e| e.with_context(&context))?;

            if plugin.spec.data.trim().is_empty() {
                return Err(Error::config_missing_key("spec.data", Some(context)));
            }
            if let Some(on) = &plugin.spec.on {
                parse_selector(on).map_err(|e| e.with_context(&context))?;
            }
            if !self.registry.contains(&plugin.spec.plugin_type) {
                log_status!(
                    "plugin",
                    "No handler for type '{}' ({}); it will never run",
                    plugin.spec.plugin_type,
                    context
                );
            }
        }

        self.loaded = true;
        Ok(())
    }

    /// Dispatch `phase` to every handler for every plugin.
    pub fn run(&self, cluster: &Cluster, phase: Phase) -> Result<()> {
        if !self.loaded {
            return Err(Error::plugin_not_loaded(phase.as_str()));
        }

        for (_, handler) in &self.registry.handlers {
            for plugin in &self.plugins {
                let ctx = PluginContext { cluster, plugin };
                handler.run(&ctx, phase)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{self, FakeConnector};
    use std::sync::Mutex;

    /// Records `(tag, plugin, phase)` for every plugin it owns at that phase.
    struct Recorder {
        tag: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl PluginHandler for Recorder {
        fn run(&self, ctx: &PluginContext, phase: Phase) -> Result<()> {
            if ctx.plugin.spec.plugin_type != self.tag || !ctx.plugin.runs_at(phase) {
                return Ok(());
            }
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}:{}", self.tag, ctx.plugin.name(), phase));
            Ok(())
        }
    }

    fn registry_with(seen: &Arc<Mutex<Vec<String>>>, tags: &[&'static str]) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        for &tag in tags {
            registry
                .register(
                    tag,
                    Box::new(Recorder {
                        tag,
                        seen: Arc::clone(seen),
                    }),
                )
                .unwrap();
        }
        registry
    }

    #[test]
    fn phase_names_parse_both_ways() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert!("PreInstall".parse::<Phase>().is_err());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = registry_with(&seen, &["LABEL"]);
        let err = registry
            .register(
                "LABEL",
                Box::new(Recorder {
                    tag: "LABEL",
                    seen: Arc::clone(&seen),
                }),
            )
            .unwrap_err();
        assert_eq!(err.code.as_str(), "plugin.duplicate_type");
        assert_eq!(registry.types(), vec!["LABEL"]);
    }

    #[test]
    fn registry_broadcast_reaches_only_the_owning_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(&seen, &["A", "B"]);
        let cluster = test_support::cluster(&["10.0.0.1"], &[]);
        let plugin = Plugin::new("b1", "B", Phase::PostJoin, "x");
        let ctx = PluginContext {
            cluster: &cluster,
            plugin: &plugin,
        };

        registry.run(&ctx, Phase::PostJoin).unwrap();
        registry.run(&ctx, Phase::PreJoin).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["B:b1:PostJoin"]);
    }

    #[test]
    fn run_before_load_fails() {
        let registry = Arc::new(PluginRegistry::new());
        let set = PluginSet::new(registry, Vec::new());
        let cluster = test_support::cluster(&["10.0.0.1"], &[]);
        let err = set.run(&cluster, Phase::PreGuest).unwrap_err();
        assert_eq!(err.code.as_str(), "plugin.not_loaded");
    }

    #[test]
    fn dispatch_order_is_registry_then_declaration() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(registry_with(&seen, &["B", "A"]));
        let plugins = vec![
            Plugin::new("a1", "A", Phase::PreGuest, "x"),
            Plugin::new("b1", "B", Phase::PreGuest, "x"),
            Plugin::new("a2", "A", Phase::PreGuest, "x"),
            Plugin::new("a3", "A", Phase::PostInstall, "x"),
        ];
        let cluster = test_support::cluster(&["10.0.0.1"], &[]);
        let mut set = PluginSet::new(registry, plugins);
        set.load().unwrap();

        set.run(&cluster, Phase::PreGuest).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["B:b1:PreGuest", "A:a1:PreGuest", "A:a2:PreGuest"]
        );
    }

    #[test]
    fn load_rejects_unknown_phase_and_bad_selector() {
        let registry = Arc::new(PluginRegistry::new());
        let cluster = test_support::cluster(&["10.0.0.1"], &["10.0.0.2"]);

        let mut plugin = Plugin::new("p", SHELL, Phase::PreGuest, "echo hi");
        plugin.spec.action = "PreFlight".to_string();
        let mut set = PluginSet::new(Arc::clone(&registry), vec![plugin]);
        let err = set.load().unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert!(!set.is_loaded());

        let plugin = Plugin::new("p", SHELL, Phase::PreGuest, "echo hi").on("zone=a");
        let mut set = PluginSet::new(registry, vec![plugin]);
        let err = set.load().unwrap_err();
        assert_eq!(err.code.as_str(), "plugin.invalid_selector");
        assert!(err.message.contains("plugin 'p'"));
    }

    #[test]
    fn shell_plugin_ignores_other_phases_without_remote_calls() {
        let fake = FakeConnector::new();
        let registry = Arc::new(PluginRegistry::with_builtin(
            Arc::new(fake.clone()),
            "/var/lib/converge/data",
        ));
        let cluster = test_support::cluster(&["10.0.0.1"], &["10.0.0.2"]);
        let plugins = vec![
            Plugin::new("late", SHELL, Phase::PostInstall, "echo late"),
            Plugin::new("other", "LABEL", Phase::PreGuest, "a=b"),
        ];
        let mut set = PluginSet::new(registry, plugins);
        set.load().unwrap();

        set.run(&cluster, Phase::PreGuest).unwrap();

        assert!(fake.log().is_empty());
        assert_eq!(fake.connect_attempts("10.0.0.1"), 0);
    }
}
