//! Cluster descriptor: the declared topology every stage converges onto.
//!
//! Master and worker lists are derived from host groups by role. Order is
//! preserved, and the first master IP (master0) is the bootstrap node that
//! control-plane queries run against.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

pub const MASTER: &str = "master";
pub const NODE: &str = "node";

pub const API_VERSION: &str = "converge.io/v2";
pub const KIND: &str = "Cluster";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: Metadata,
    pub spec: ClusterSpec,
    #[serde(default, skip_serializing_if = "ClusterStatus::is_empty")]
    pub status: ClusterStatus,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub image: String,
    /// `KEY=VALUE` pairs exported to every plugin command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Guest commands run on master0 by the install stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub hosts: Vec<Host>,
}

/// SSH credentials. Every field is optional so a host group can override
/// only what differs from the cluster-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk_passwd: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_port",
        skip_serializing_if = "Option::is_none"
    )]
    pub port: Option<u16>,
}

impl SshConfig {
    /// Overlay `other` on top of `self`; set fields in `other` win.
    pub fn merged_with(&self, other: &SshConfig) -> SshConfig {
        fn pick(base: &Option<String>, over: &Option<String>) -> Option<String> {
            over.clone()
                .filter(|v| !v.is_empty())
                .or_else(|| base.clone())
        }

        SshConfig {
            user: pick(&self.user, &other.user),
            passwd: pick(&self.passwd, &other.passwd),
            pk: pick(&self.pk, &other.pk),
            pk_passwd: pick(&self.pk_passwd, &other.pk_passwd),
            port: other.port.or(self.port),
        }
    }
}

// Cluster files written by older tooling quote the port ("22").
fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPort {
        Num(u16),
        Text(String),
    }

    match Option::<RawPort>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawPort::Num(port)) => Ok(Some(port)),
        Some(RawPort::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(RawPort::Text(text)) => text
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid ssh port '{}'", text))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Host {
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

impl Host {
    pub fn new(ips: Vec<String>, roles: Vec<String>) -> Self {
        Self {
            ips,
            roles,
            ssh: None,
            env: Vec::new(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Fields negotiated at runtime and cached on the descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroup_driver: Option<String>,
}

impl ClusterStatus {
    pub fn is_empty(&self) -> bool {
        self.cgroup_driver.is_none()
    }
}

impl Cluster {
    pub fn new(name: impl Into<String>, image: impl Into<String>, hosts: Vec<Host>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: Metadata {
                name: name.into(),
                labels: BTreeMap::new(),
            },
            spec: ClusterSpec {
                image: image.into(),
                hosts,
                ..Default::default()
            },
            status: ClusterStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn ips_by_role(&self, role: &str) -> Vec<String> {
        self.spec
            .hosts
            .iter()
            .filter(|host| host.has_role(role))
            .flat_map(|host| host.ips.iter().cloned())
            .collect()
    }

    pub fn master_ips(&self) -> Vec<String> {
        self.ips_by_role(MASTER)
    }

    pub fn node_ips(&self) -> Vec<String> {
        self.ips_by_role(NODE)
    }

    /// Masters followed by workers.
    pub fn all_ips(&self) -> Vec<String> {
        let mut ips = self.master_ips();
        ips.extend(self.node_ips());
        ips
    }

    pub fn master0(&self) -> Option<String> {
        self.master_ips().into_iter().next()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.spec.hosts.iter().any(|host| host.has_role(role))
    }

    pub fn host_group(&self, ip: &str) -> Option<&Host> {
        self.spec
            .hosts
            .iter()
            .find(|host| host.ips.iter().any(|candidate| candidate == ip))
    }

    /// Effective SSH settings for one host: cluster-wide, overlaid with the
    /// host group's override when present.
    pub fn ssh_for(&self, ip: &str) -> SshConfig {
        match self.host_group(ip).and_then(|host| host.ssh.as_ref()) {
            Some(over) => self.spec.ssh.merged_with(over),
            None => self.spec.ssh.clone(),
        }
    }

    /// Effective environment for one host; host group entries override
    /// cluster-wide entries with the same key.
    pub fn env_for(&self, ip: &str) -> BTreeMap<String, String> {
        let mut env = parse_env(&self.spec.env);
        if let Some(host) = self.host_group(ip) {
            env.extend(parse_env(&host.env));
        }
        env
    }
}

/// Parse `KEY=VALUE` entries; entries without `=` are skipped.
pub fn parse_env(entries: &[String]) -> BTreeMap<String, String> {
    entries
        .iter()
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
