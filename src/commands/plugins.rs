use clap::Args;
use serde::Serialize;

use converge::plugin::PluginSet;

use super::{CmdResult, Runtime};

#[derive(Args)]
pub struct PluginsArgs {
    /// Validate declared plugins against the cluster
    #[arg(long)]
    pub check: bool,
}

#[derive(Debug, Serialize)]
pub struct DeclaredPlugin {
    pub name: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
    pub handled: bool,
}

#[derive(Debug, Serialize)]
pub struct PluginsOutput {
    pub handlers: Vec<String>,
    pub plugins: Vec<DeclaredPlugin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
}

pub fn run(args: PluginsArgs, global: &crate::commands::GlobalArgs) -> CmdResult<PluginsOutput> {
    let (_, file) = global.load()?;
    let runtime = Runtime::load();

    let valid = if args.check {
        let mut set = PluginSet::new(runtime.registry.clone(), file.plugins.clone());
        set.load()?;
        Some(set.is_loaded())
    } else {
        None
    };

    let plugins = file
        .plugins
        .iter()
        .map(|plugin| DeclaredPlugin {
            name: plugin.name().to_string(),
            plugin_type: plugin.spec.plugin_type.clone(),
            action: plugin.spec.action.clone(),
            on: plugin.spec.on.clone(),
            handled: runtime.registry.contains(&plugin.spec.plugin_type),
        })
        .collect();

    Ok((
        PluginsOutput {
            handlers: runtime.registry.types().iter().map(|t| t.to_string()).collect(),
            plugins,
            valid,
        },
        0,
    ))
}
