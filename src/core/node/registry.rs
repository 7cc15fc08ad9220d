//! Image registry endpoint that joined nodes resolve and log in to.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::defaults::RuntimeDefaults;
use crate::error::{Error, Result};
use crate::utils::io;

/// Registry settings, read from `<rootfs>/etc/registry.yml` when present.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub ip: String,
    pub domain: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl RegistryConfig {
    /// Registry on master0 with the configured domain and port.
    pub fn defaults(master0: &str, runtime: &RuntimeDefaults) -> Self {
        Self {
            ip: master0.to_string(),
            domain: runtime.registry_domain.clone(),
            port: runtime.registry_port,
            username: None,
            password: None,
        }
    }

    pub fn load(rootfs: &Path, master0: &str, runtime: &RuntimeDefaults) -> Result<Self> {
        let mut config = Self::defaults(master0, runtime);
        let path = rootfs.join("etc").join("registry.yml");
        if !path.exists() {
            return Ok(config);
        }

        let content = io::read_file(&path, "read registry config")?;
        let file: RegistryFile = if content.trim().is_empty() {
            RegistryFile::default()
        } else {
            serde_yml::from_str(&content)
                .map_err(|e| Error::config_invalid_yaml(path.display().to_string(), e.to_string()))?
        };

        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        if let Some(ip) = non_empty(file.ip) {
            config.ip = ip;
        }
        if let Some(domain) = non_empty(file.domain) {
            config.domain = domain;
        }
        if let Some(port) = file.port {
            config.port = port;
        }
        config.username = non_empty(file.username);
        config.password = non_empty(file.password);
        Ok(config)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.domain, self.port)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// CA certificate shipped in the rootfs.
    pub fn local_cert(&self, rootfs: &Path) -> PathBuf {
        rootfs.join("certs").join(format!("{}.crt", self.domain))
    }

    /// Where docker looks for the registry's CA on each node.
    pub fn remote_cert(&self) -> String {
        format!("/etc/docker/certs.d/{}/ca.crt", self.endpoint())
    }
}
