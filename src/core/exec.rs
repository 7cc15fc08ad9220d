//! Ad hoc command broadcast to hosts selected by role.

use std::sync::Arc;

use crate::batch;
use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::ssh::Connector;

pub struct Exec {
    connector: Arc<dyn Connector>,
    cluster: Cluster,
    ips: Vec<String>,
}

impl Exec {
    /// Target all masters and nodes when `roles` is empty, otherwise every
    /// host carrying one of the comma-separated roles.
    pub fn new(connector: Arc<dyn Connector>, cluster: Cluster, roles: &str) -> Result<Self> {
        let roles: Vec<&str> = roles
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .collect();

        let ips = if roles.is_empty() {
            cluster.all_ips()
        } else {
            let ips: Vec<String> = roles
                .iter()
                .flat_map(|role| cluster.ips_by_role(role))
                .collect();
            if ips.is_empty() {
                return Err(Error::validation_invalid_argument(
                    "roles",
                    "no hosts match, please check your roles label",
                    Some(roles.join(",")),
                    None,
                ));
            }
            ips
        };

        Ok(Self {
            connector,
            cluster,
            ips,
        })
    }

    pub fn ips(&self) -> &[String] {
        &self.ips
    }

    /// Run `cmd` on every target concurrently.
    pub fn run_cmd(&self, cmd: &str) -> Result<()> {
        let connector = Arc::clone(&self.connector);
        let cluster = self.cluster.clone();
        let cmd = cmd.to_string();

        batch::run_per_host("exec", &self.ips, move |ip| {
            connector
                .connect(ip, &cluster)?
                .cmd_async(std::slice::from_ref(&cmd))
        })
    }
}
