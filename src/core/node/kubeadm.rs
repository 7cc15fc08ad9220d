//! kubeadm join configuration and bootstrap token discovery.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::clusterfile::KIND_KUBEADM;
use crate::error::{Error, Result};

pub const KUBEADM_API_VERSION: &str = "kubeadm.k8s.io/v1beta2";
pub const KUBEADM_API_VERSION_V1BETA3: &str = "kubeadm.k8s.io/v1beta3";
pub const KUBELET_API_VERSION: &str = "kubelet.config.k8s.io/v1beta1";
pub const DEFAULT_CRI_SOCKET: &str = "/var/run/dockershim.sock";
pub const DEFAULT_DISCOVERY_TIMEOUT: &str = "5m0s";
pub const DEFAULT_CGROUP_DRIVER: &str = "cgroupfs";

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"--token\s+(\S+)").unwrap());

static CA_HASH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--discovery-token-ca-cert-hash\s+(\S+)").unwrap());

// upload-certs prints the key alone on its last line.
static CERTIFICATE_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{64}$").unwrap());

/// Join settings declared in the cluster file. Unset fields fall back to
/// built-in defaults when merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KubeadmConfig {
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub spec: KubeadmSpec,
}

fn default_kind() -> String {
    KIND_KUBEADM.to_string()
}

impl Default for KubeadmConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            spec: KubeadmSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cri_socket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_timeout: Option<String>,
    /// Overrides the probed cgroup driver when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroup_driver: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kubelet_extra_args: BTreeMap<String, String>,
}

/// Effective join settings for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSettings {
    pub api_version: String,
    pub cri_socket: String,
    pub discovery_timeout: String,
    pub api_server_endpoint: String,
    pub cgroup_driver: Option<String>,
    pub kubelet_extra_args: BTreeMap<String, String>,
}

impl JoinSettings {
    /// Overlay the cluster file's settings on the built-in defaults.
    ///
    /// The kubeadm API version defaults from the Kubernetes version in the
    /// image tag.
    pub fn merge(
        declared: Option<&KubeadmConfig>,
        api_server_endpoint: String,
        image: &str,
    ) -> Self {
        let spec = declared.map(|c| c.spec.clone()).unwrap_or_default();
        let pick = |value: Option<String>, fallback: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };

        Self {
            api_version: pick(spec.api_version, default_api_version(image)),
            cri_socket: pick(spec.cri_socket, DEFAULT_CRI_SOCKET),
            discovery_timeout: pick(spec.discovery_timeout, DEFAULT_DISCOVERY_TIMEOUT),
            api_server_endpoint,
            cgroup_driver: spec.cgroup_driver.filter(|v| !v.trim().is_empty()),
            kubelet_extra_args: spec.kubelet_extra_args,
        }
    }
}

/// Kubernetes version carried in an image tag such as `kubernetes:v1.19.8`.
pub fn image_kube_version(image: &str) -> Option<semver::Version> {
    let (_, tag) = image.rsplit_once(':')?;
    semver::Version::parse(tag.trim_start_matches('v')).ok()
}

/// kubeadm dropped v1beta2 join configs in 1.22.
pub fn default_api_version(image: &str) -> &'static str {
    match image_kube_version(image) {
        Some(version) if version >= semver::Version::new(1, 22, 0) => KUBEADM_API_VERSION_V1BETA3,
        _ => KUBEADM_API_VERSION,
    }
}

/// Bootstrap credentials minted once per join batch on master0.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinToken {
    pub token: String,
    pub ca_cert_hashes: Vec<String>,
    pub certificate_key: Option<String>,
}

impl JoinToken {
    /// Parse `kubeadm token create --print-join-command` output.
    pub fn parse_join_command(output: &str) -> Result<Self> {
        let token = TOKEN_PATTERN
            .captures(output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                Error::config_invalid_value(
                    "joinCommand",
                    Some(output.trim().to_string()),
                    "no bootstrap token in kubeadm output",
                )
            })?;

        let ca_cert_hashes: Vec<String> = CA_HASH_PATTERN
            .captures_iter(output)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();
        if ca_cert_hashes.is_empty() {
            return Err(Error::config_invalid_value(
                "joinCommand",
                Some(output.trim().to_string()),
                "no CA certificate hash in kubeadm output",
            ));
        }

        Ok(Self {
            token,
            ca_cert_hashes,
            certificate_key: None,
        })
    }
}

/// Pull the certificate key out of `kubeadm init phase upload-certs` output.
pub fn parse_certificate_key(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| CERTIFICATE_KEY_PATTERN.is_match(line))
        .last()
        .map(str::to_string)
}

/// Parse `docker info | grep 'Cgroup Driver'` output.
pub fn parse_cgroup_driver(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.split_once("Cgroup Driver:"))
        .map(|(_, driver)| driver.trim().to_string())
        .filter(|driver| !driver.is_empty())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinConfiguration<'a> {
    api_version: &'a str,
    kind: &'static str,
    discovery: Discovery<'a>,
    node_registration: NodeRegistration<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Discovery<'a> {
    bootstrap_token: BootstrapToken<'a>,
    timeout: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BootstrapToken<'a> {
    api_server_endpoint: &'a str,
    token: &'a str,
    ca_cert_hashes: &'a [String],
    unsafe_skip_ca_verification: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeRegistration<'a> {
    cri_socket: &'a str,
    #[serde(skip_serializing_if = "no_extra_args")]
    kubelet_extra_args: &'a BTreeMap<String, String>,
}

fn no_extra_args(args: &&BTreeMap<String, String>) -> bool {
    args.is_empty()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KubeletConfiguration<'a> {
    api_version: &'static str,
    kind: &'static str,
    cgroup_driver: &'a str,
}

/// Render the JoinConfiguration and KubeletConfiguration documents.
pub fn render_join_config(settings: &JoinSettings, token: &JoinToken) -> Result<String> {
    let join = JoinConfiguration {
        api_version: &settings.api_version,
        kind: "JoinConfiguration",
        discovery: Discovery {
            bootstrap_token: BootstrapToken {
                api_server_endpoint: &settings.api_server_endpoint,
                token: &token.token,
                ca_cert_hashes: &token.ca_cert_hashes,
                unsafe_skip_ca_verification: false,
            },
            timeout: &settings.discovery_timeout,
        },
        node_registration: NodeRegistration {
            cri_socket: &settings.cri_socket,
            kubelet_extra_args: &settings.kubelet_extra_args,
        },
    };
    let kubelet = KubeletConfiguration {
        api_version: KUBELET_API_VERSION,
        kind: "KubeletConfiguration",
        cgroup_driver: settings
            .cgroup_driver
            .as_deref()
            .unwrap_or(DEFAULT_CGROUP_DRIVER),
    };

    Ok(format!("{}---\n{}", to_yaml(&join)?, to_yaml(&kubelet)?))
}

fn to_yaml<T: Serialize>(value: &T) -> Result<String> {
    serde_yml::to_string(value)
        .map_err(|e| Error::internal_unexpected(format!("render join config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOIN_OUTPUT: &str = "kubeadm join 10.103.97.2:6443 --token abcdef.0123456789abcdef \
--discovery-token-ca-cert-hash sha256:4f9c\n";

    #[test]
    fn join_command_yields_token_and_hash() {
        let token = JoinToken::parse_join_command(JOIN_OUTPUT).unwrap();
        assert_eq!(token.token, "abcdef.0123456789abcdef");
        assert_eq!(token.ca_cert_hashes, vec!["sha256:4f9c"]);
    }

    #[test]
    fn join_command_without_token_fails() {
        let err = JoinToken::parse_join_command("error: not a control plane").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }

    #[test]
    fn certificate_key_is_last_hex_line() {
        let key = "a".repeat(64);
        let output = format!("[upload-certs] Using certificate key:\n{}\n", key);
        assert_eq!(parse_certificate_key(&output), Some(key));
        assert_eq!(parse_certificate_key("nothing here"), None);
    }

    #[test]
    fn cgroup_driver_is_read_from_docker_info() {
        assert_eq!(
            parse_cgroup_driver(" Cgroup Driver: systemd\n").as_deref(),
            Some("systemd")
        );
        assert_eq!(parse_cgroup_driver(""), None);
    }

    #[test]
    fn declared_settings_override_defaults() {
        let declared = KubeadmConfig {
            spec: KubeadmSpec {
                cri_socket: Some("/run/containerd/containerd.sock".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let settings = JoinSettings::merge(
            Some(&declared),
            "10.103.97.2:6443".to_string(),
            "kubernetes:v1.19.8",
        );
        assert_eq!(settings.cri_socket, "/run/containerd/containerd.sock");
        assert_eq!(settings.api_version, KUBEADM_API_VERSION);
        assert_eq!(settings.discovery_timeout, DEFAULT_DISCOVERY_TIMEOUT);
    }

    #[test]
    fn api_version_follows_image_tag() {
        assert_eq!(default_api_version("kubernetes:v1.19.8"), KUBEADM_API_VERSION);
        assert_eq!(
            default_api_version("registry.local:5000/kubernetes:v1.22.4"),
            KUBEADM_API_VERSION_V1BETA3
        );
        assert_eq!(default_api_version("kubernetes:latest"), KUBEADM_API_VERSION);
        assert_eq!(default_api_version("kubernetes"), KUBEADM_API_VERSION);
    }

    #[test]
    fn join_config_renders_both_documents() {
        let mut settings = JoinSettings::merge(None, "10.103.97.2:6443".to_string(), "kubernetes:v1.19.8");
        settings.cgroup_driver = Some("systemd".to_string());
        let token = JoinToken::parse_join_command(JOIN_OUTPUT).unwrap();

        let yaml = render_join_config(&settings, &token).unwrap();
        let (join, kubelet) = yaml.split_once("---\n").unwrap();

        let join: serde_json::Value = serde_yml::from_str(join).unwrap();
        assert_eq!(join["kind"], "JoinConfiguration");
        assert_eq!(
            join["discovery"]["bootstrapToken"]["apiServerEndpoint"],
            "10.103.97.2:6443"
        );
        assert_eq!(
            join["discovery"]["bootstrapToken"]["token"],
            "abcdef.0123456789abcdef"
        );
        let kubelet: serde_json::Value = serde_yml::from_str(kubelet).unwrap();
        assert_eq!(kubelet["cgroupDriver"], "systemd");
    }
}
