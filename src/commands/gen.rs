use clap::Args;
use serde::Serialize;

use converge::cluster::Cluster;
use converge::clusterfile::ClusterFile;
use converge::collab::KubectlClient;
use converge::paths;
use converge::processor::{generate_cluster, GenerateArgs};

use super::CmdResult;

#[derive(Args)]
pub struct GenArgs {
    /// Name for the generated cluster
    #[arg(long, default_value = "my-cluster")]
    pub name: String,

    /// Cluster image the running cluster was built from
    #[arg(long)]
    pub image: String,

    /// SSH password for every host
    #[arg(long)]
    pub passwd: Option<String>,

    /// SSH port
    #[arg(long)]
    pub port: Option<u16>,

    /// SSH private key path
    #[arg(long)]
    pub pk: Option<String>,

    /// Passphrase for the private key
    #[arg(long)]
    pub pk_passwd: Option<String>,

    /// kubeconfig passed to kubectl
    #[arg(long)]
    pub kubeconfig: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenOutput {
    pub clusterfile: String,
    pub cluster: Cluster,
}

pub fn run(args: GenArgs, global: &crate::commands::GlobalArgs) -> CmdResult<GenOutput> {
    let kube = KubectlClient {
        kubeconfig: args.kubeconfig.clone(),
    };
    let generate = GenerateArgs {
        name: args.name,
        image: args.image,
        passwd: args.passwd,
        port: args.port,
        pk: args.pk,
        pk_passwd: args.pk_passwd,
    };
    let cluster = generate_cluster(&generate, &kube)?;

    let path = match &global.clusterfile {
        Some(_) => global.clusterfile_path()?,
        None => paths::cluster_file(cluster.name())?,
    };
    ClusterFile::new(cluster.clone()).save(&path)?;

    Ok((
        GenOutput {
            clusterfile: path.display().to_string(),
            cluster,
        },
        0,
    ))
}
