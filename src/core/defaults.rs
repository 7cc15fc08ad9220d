use serde::{Deserialize, Serialize};
use std::fs;

use crate::core::paths;

/// Root configuration structure for converge.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConvergeConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via converge.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Defaults {
    #[serde(default)]
    pub ssh: SshDefaults,

    #[serde(default)]
    pub runtime: RuntimeDefaults,
}

/// SSH transport settings shared by every remote executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshDefaults {
    #[serde(default = "default_ssh_user")]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u32,

    /// Attempts made while waiting for SSH on freshly joined hosts.
    #[serde(default = "default_ready_attempts")]
    pub ready_attempts: u32,

    #[serde(default = "default_ready_interval_secs")]
    pub ready_interval_secs: u64,
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            ready_attempts: default_ready_attempts(),
            ready_interval_secs: default_ready_interval_secs(),
        }
    }
}

/// Control-plane layout shared by join, delete and plugin dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeDefaults {
    #[serde(default = "default_vip")]
    pub vip: String,

    #[serde(default = "default_apiserver_domain")]
    pub apiserver_domain: String,

    #[serde(default = "default_registry_domain")]
    pub registry_domain: String,

    #[serde(default = "default_registry_port")]
    pub registry_port: u16,

    #[serde(default = "default_rootfs_base")]
    pub rootfs_base: String,

    #[serde(default)]
    pub kubeadm_verbosity: u8,
}

impl Default for RuntimeDefaults {
    fn default() -> Self {
        Self {
            vip: default_vip(),
            apiserver_domain: default_apiserver_domain(),
            registry_domain: default_registry_domain(),
            registry_port: default_registry_port(),
            rootfs_base: default_rootfs_base(),
            kubeadm_verbosity: 0,
        }
    }
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u32 {
    10
}

fn default_ready_attempts() -> u32 {
    6
}

fn default_ready_interval_secs() -> u64 {
    5
}

fn default_vip() -> String {
    "10.103.97.2".to_string()
}

fn default_apiserver_domain() -> String {
    "apiserver.cluster.local".to_string()
}

fn default_registry_domain() -> String {
    "sea.hub".to_string()
}

fn default_registry_port() -> u16 {
    5000
}

fn default_rootfs_base() -> String {
    "/var/lib/converge/data".to_string()
}

/// Load defaults from converge.json, falling back to built-ins on any error.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

/// Load the full converge.json config, falling back to defaults on any error.
pub fn load_config() -> ConvergeConfig {
    load_config_from_file().unwrap_or_default()
}

fn load_config_from_file() -> crate::Result<ConvergeConfig> {
    let path = paths::converge_json()?;

    if !path.exists() {
        return Err(crate::Error::config_missing_key(
            "converge.json",
            Some(path.display().to_string()),
        ));
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        crate::Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> crate::Result<ConvergeConfig> {
    serde_json::from_str(content).map_err(|e| {
        crate::Error::validation_invalid_json(e, Some("parse converge.json".to_string()))
    })
}
