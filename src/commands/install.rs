use clap::Args;
use serde::Serialize;

use converge::collab::{ScpFilesystem, ShellGuest};
use converge::config_render::Configuration;
use converge::paths;
use converge::pipeline::Processor;
use converge::processor::InstallProcessor;

use super::{CmdResult, Runtime};

#[derive(Args)]
pub struct InstallArgs {}

#[derive(Debug, Serialize)]
pub struct InstallOutput {
    pub cluster: String,
    pub image: String,
    pub hosts: Vec<String>,
    pub configs: usize,
}

pub fn run(_args: InstallArgs, global: &crate::commands::GlobalArgs) -> CmdResult<InstallOutput> {
    let (path, mut file) = global.load()?;
    let runtime = Runtime::load();
    let base = runtime.defaults.runtime.rootfs_base.clone();
    let mut cluster = file.cluster.clone();

    let mut processor = InstallProcessor::new(
        &file,
        Configuration::new(paths::cluster_rootfs(&base, cluster.name())),
        Box::new(ScpFilesystem::new(runtime.connector.clone(), base.clone())),
        Box::new(ShellGuest::new(runtime.connector.clone(), base)),
        runtime.registry.clone(),
    );
    processor.execute(&mut cluster)?;

    file.cluster = cluster;
    file.save(&path)?;

    Ok((
        InstallOutput {
            cluster: file.cluster.name().to_string(),
            image: file.cluster.spec.image.clone(),
            hosts: file.cluster.all_ips(),
            configs: file.configs.len(),
        },
        0,
    ))
}
