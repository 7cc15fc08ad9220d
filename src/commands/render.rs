use clap::Args;
use serde::Serialize;

use converge::config_render::{self, Configuration};
use converge::{defaults, paths};

use super::CmdResult;

#[derive(Args)]
pub struct RenderArgs {
    /// Write rendered configs into the cluster rootfs instead of printing them
    #[arg(long)]
    pub dump: bool,

    /// Rootfs to dump into (default: the cluster's rootfs)
    #[arg(long, requires = "dump")]
    pub rootfs: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RenderedConfig {
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RenderOutput {
    pub cluster: String,
    pub dumped: bool,
    pub configs: Vec<RenderedConfig>,
}

pub fn run(args: RenderArgs, global: &crate::commands::GlobalArgs) -> CmdResult<RenderOutput> {
    let (_, file) = global.load()?;

    if args.dump {
        let rootfs = match args.rootfs {
            Some(rootfs) => shellexpand::tilde(&rootfs).to_string(),
            None => {
                let base = defaults::load_defaults().runtime.rootfs_base;
                paths::cluster_rootfs(&base, file.cluster.name())
            }
        };
        let configuration = Configuration::new(rootfs);
        configuration.dump(&file.configs)?;

        let configs = file
            .configs
            .iter()
            .map(|config| RenderedConfig {
                name: config.name().to_string(),
                path: configuration.target_path(config).display().to_string(),
                data: None,
            })
            .collect();
        return Ok((
            RenderOutput {
                cluster: file.cluster.name().to_string(),
                dumped: true,
                configs,
            },
            0,
        ));
    }

    let mut configs = Vec::new();
    for config in &file.configs {
        let mut rendered = config.clone();
        config_render::render(&mut rendered)?;
        configs.push(RenderedConfig {
            name: rendered.name().to_string(),
            path: rendered.spec.path.clone(),
            data: Some(rendered.spec.data),
        });
    }

    Ok((
        RenderOutput {
            cluster: file.cluster.name().to_string(),
            dumped: false,
            configs,
        },
        0,
    ))
}
