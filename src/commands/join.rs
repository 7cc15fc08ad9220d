use clap::Args;
use serde::Serialize;

use converge::collab::{Filesystem, ScpFilesystem};
use converge::node::NodeOrchestrator;
use converge::plugin::{Phase, PluginSet};

use super::{add_node_ips, parse_ips, CmdResult, Runtime};

#[derive(Args)]
pub struct JoinArgs {
    /// Worker IPs to join (comma-separated, ranges like 10.0.0.2-10.0.0.9)
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub nodes: Vec<String>,

    /// Skip copying the rootfs to the new nodes
    #[arg(long)]
    pub skip_rootfs: bool,
}

#[derive(Debug, Serialize)]
pub struct JoinOutput {
    pub cluster: String,
    pub joined: Vec<String>,
    pub cgroup_driver: Option<String>,
    pub clusterfile: String,
}

pub fn run(args: JoinArgs, global: &crate::commands::GlobalArgs) -> CmdResult<JoinOutput> {
    let ips = parse_ips(&args.nodes)?;
    let (path, mut file) = global.load()?;
    let runtime = Runtime::load();
    let mut cluster = file.cluster.clone();

    let mut plugins = PluginSet::new(runtime.registry.clone(), file.plugins.clone());
    plugins.load()?;
    plugins.run(&cluster, Phase::PreJoin)?;

    if !args.skip_rootfs {
        ScpFilesystem::new(runtime.connector.clone(), runtime.defaults.runtime.rootfs_base.clone())
            .mount_rootfs(&cluster, &ips, true)?;
    }

    NodeOrchestrator::new(runtime.connector.clone(), &runtime.defaults)
        .with_kubeadm_config(file.kubeadm.clone())
        .join_nodes(&mut cluster, &ips)?;

    add_node_ips(&mut cluster, &ips);
    plugins.run(&cluster, Phase::PostJoin)?;

    file.cluster = cluster;
    file.save(&path)?;

    Ok((
        JoinOutput {
            cluster: file.cluster.name().to_string(),
            joined: ips,
            cgroup_driver: file.cluster.status.cgroup_driver.clone(),
            clusterfile: path.display().to_string(),
        },
        0,
    ))
}
