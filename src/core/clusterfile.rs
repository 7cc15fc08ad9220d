//! Multi-document cluster file.
//!
//! One YAML stream holds the `Cluster` descriptor plus any number of
//! `Config`, `Plugin` and `KubeadmConfig` documents, discriminated by `kind`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cluster::{self, Cluster};
use crate::config_render::Config;
use crate::error::{Error, Result};
use crate::node::kubeadm::KubeadmConfig;
use crate::plugin::Plugin;
use crate::utils::io;

pub const KIND_CONFIG: &str = "Config";
pub const KIND_PLUGIN: &str = "Plugin";
pub const KIND_KUBEADM: &str = "KubeadmConfig";

/// Read-only view of a persisted cluster descriptor.
pub trait ClusterSource: Send + Sync {
    fn cluster(&self) -> Cluster;
    fn configs(&self) -> Vec<Config>;
    fn plugins(&self) -> Vec<Plugin>;
    fn kubeadm_config(&self) -> Option<KubeadmConfig>;
}

#[derive(Debug, Clone, Default)]
pub struct ClusterFile {
    pub cluster: Cluster,
    pub configs: Vec<Config>,
    pub plugins: Vec<Plugin>,
    pub kubeadm: Option<KubeadmConfig>,
}

#[derive(Deserialize)]
struct KindProbe {
    #[serde(default)]
    kind: Option<String>,
}

impl ClusterFile {
    pub fn new(cluster: Cluster) -> Self {
        Self {
            cluster,
            ..Default::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = io::read_file(path, &format!("read {}", path.display()))?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse a YAML stream. `origin` names the source in error messages.
    pub fn parse(content: &str, origin: &str) -> Result<Self> {
        let mut cluster: Option<Cluster> = None;
        let mut configs = Vec::new();
        let mut plugins = Vec::new();
        let mut kubeadm = None;

        for (index, doc) in split_documents(content).into_iter().enumerate() {
            let location = format!("{} (document {})", origin, index + 1);
            let probe: KindProbe = parse_doc(&doc, &location)?;

            match probe.kind.as_deref() {
                Some(cluster::KIND) => {
                    if cluster.is_some() {
                        return Err(Error::config_invalid_value(
                            "kind",
                            Some(cluster::KIND.to_string()),
                            format!("{} declares more than one Cluster", origin),
                        ));
                    }
                    cluster = Some(parse_doc(&doc, &location)?);
                }
                Some(KIND_CONFIG) => configs.push(parse_doc(&doc, &location)?),
                Some(KIND_PLUGIN) => plugins.push(parse_doc(&doc, &location)?),
                Some(KIND_KUBEADM) => kubeadm = Some(parse_doc(&doc, &location)?),
                Some(other) => {
                    log_status!("clusterfile", "Skipping unknown kind '{}' in {}", other, location);
                }
                None => {
                    return Err(Error::config_missing_key("kind", Some(location)));
                }
            }
        }

        let cluster = cluster.ok_or_else(|| {
            Error::config_missing_key("kind: Cluster", Some(origin.to_string()))
        })?;

        Ok(Self {
            cluster,
            configs,
            plugins,
            kubeadm,
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        let mut docs = vec![to_yaml_doc(&self.cluster)?];
        for config in &self.configs {
            docs.push(to_yaml_doc(config)?);
        }
        for plugin in &self.plugins {
            docs.push(to_yaml_doc(plugin)?);
        }
        if let Some(kubeadm) = &self.kubeadm {
            docs.push(to_yaml_doc(kubeadm)?);
        }
        Ok(docs.join("---\n"))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            io::ensure_dir(parent, "create cluster dir")?;
        }
        io::write_file_atomic(path, &self.to_yaml()?, "write cluster file")
    }
}

impl ClusterSource for ClusterFile {
    fn cluster(&self) -> Cluster {
        self.cluster.clone()
    }

    fn configs(&self) -> Vec<Config> {
        self.configs.clone()
    }

    fn plugins(&self) -> Vec<Plugin> {
        self.plugins.clone()
    }

    fn kubeadm_config(&self) -> Option<KubeadmConfig> {
        self.kubeadm.clone()
    }
}

/// Split a YAML stream on `---` separator lines, dropping empty documents.
fn split_documents(content: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if line.trim_end() == "---" {
            docs.push(std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    docs.push(current);

    docs.into_iter()
        .filter(|doc| {
            doc.lines()
                .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        })
        .collect()
}

fn parse_doc<T: serde::de::DeserializeOwned>(doc: &str, location: &str) -> Result<T> {
    serde_yml::from_str(doc).map_err(|e| Error::config_invalid_yaml(location, e.to_string()))
}

fn to_yaml_doc<T: Serialize>(value: &T) -> Result<String> {
    serde_yml::to_string(value)
        .map_err(|e| Error::internal_unexpected(format!("serialize cluster file: {}", e)))
}
