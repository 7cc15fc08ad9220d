use clap::Args;
use serde::Serialize;

use converge::node::NodeOrchestrator;
use converge::plugin::{Phase, PluginSet};

use super::{parse_ips, remove_node_ips, CmdResult, Runtime};

#[derive(Args)]
pub struct DeleteArgs {
    /// Worker IPs to remove (comma-separated, ranges like 10.0.0.2-10.0.0.9)
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteOutput {
    pub cluster: String,
    pub deleted: Vec<String>,
    pub clusterfile: String,
}

pub fn run(args: DeleteArgs, global: &crate::commands::GlobalArgs) -> CmdResult<DeleteOutput> {
    let ips = parse_ips(&args.nodes)?;
    let (path, mut file) = global.load()?;
    let runtime = Runtime::load();

    let mut plugins = PluginSet::new(runtime.registry.clone(), file.plugins.clone());
    plugins.load()?;
    plugins.run(&file.cluster, Phase::PreClean)?;

    NodeOrchestrator::new(runtime.connector.clone(), &runtime.defaults)
        .delete_nodes(&file.cluster, &ips)?;

    remove_node_ips(&mut file.cluster, &ips);
    plugins.run(&file.cluster, Phase::PostClean)?;
    file.save(&path)?;

    Ok((
        DeleteOutput {
            cluster: file.cluster.name().to_string(),
            deleted: ips,
            clusterfile: path.display().to_string(),
        },
        0,
    ))
}
