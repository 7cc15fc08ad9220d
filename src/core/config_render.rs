//! Declarative config rendering.
//!
//! A `Config` document carries raw text plus a `|`-delimited processor
//! chain (`value`, `toJson`, `toBase64`). Rendering runs the chain left to
//! right over an explicit payload, then writes the result back to
//! `spec.data`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::clusterfile::KIND_CONFIG;
use crate::error::{Error, Result};
use crate::utils::io;

pub const VALUE_PROCESSOR: &str = "value";
pub const TO_JSON_PROCESSOR: &str = "toJson";
pub const TO_BASE64_PROCESSOR: &str = "toBase64";

pub const VALUE_LABEL_KEY: &str = "preprocess.value";
pub const VALUE_LABEL_TRUE: &str = "true";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ConfigMetadata,
    pub spec: ConfigSpec,
}

fn default_kind() -> String {
    KIND_CONFIG.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConfigMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConfigSpec {
    /// Target file, relative to the cluster rootfs.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
}

impl Config {
    pub fn new(name: impl Into<String>, path: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: default_kind(),
            metadata: ConfigMetadata {
                name: name.into(),
                labels: BTreeMap::new(),
            },
            spec: ConfigSpec {
                path: path.into(),
                data: data.into(),
                process: None,
            },
        }
    }

    pub fn with_process(mut self, process: impl Into<String>) -> Self {
        self.spec.process = Some(process.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn is_value_map(&self) -> bool {
        self.metadata.labels.get(VALUE_LABEL_KEY).map(String::as_str) == Some(VALUE_LABEL_TRUE)
    }
}

/// The data under transformation.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Whole-document text.
    Document(String),
    /// Top-level mapping, transformed value by value.
    Values(BTreeMap<String, serde_yml::Value>),
}

type Processor = fn(&mut Config, Payload) -> std::result::Result<Payload, String>;

fn lookup(name: &str) -> Option<Processor> {
    match name {
        VALUE_PROCESSOR => Some(process_value),
        TO_JSON_PROCESSOR => Some(process_to_json),
        TO_BASE64_PROCESSOR => Some(process_to_base64),
        _ => None,
    }
}

/// Run the config's processor chain and store the result in `spec.data`.
///
/// `value` only labels the config. The labelled text is parsed into a map
/// by the first `toJson`/`toBase64` that needs it, and the map is written
/// back as YAML only in that case. Unknown processor names are logged and
/// skipped. On error `spec.data` keeps its pre-render text; labels already
/// set stay set.
pub fn render(config: &mut Config) -> Result<()> {
    let chain = config.spec.process.clone().unwrap_or_default();
    let mut payload = Payload::Document(config.spec.data.clone());

    for name in chain.split('|').map(str::trim) {
        if name.is_empty() {
            continue;
        }
        let Some(processor) = lookup(name) else {
            log_status!(
                "config",
                "Unknown processor '{}' in config '{}', skipping",
                name,
                config.name()
            );
            continue;
        };
        payload = processor(config, payload)
            .map_err(|e| Error::config_render_failed(config.name(), name, e))?;
    }

    config.spec.data = match payload {
        Payload::Document(text) => text,
        Payload::Values(values) => serde_yml::to_string(&values)
            .map_err(|e| Error::config_render_failed(config.name(), "serialize", e.to_string()))?,
    };
    Ok(())
}

fn parse_values(data: &str) -> std::result::Result<BTreeMap<String, serde_yml::Value>, String> {
    if data.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_yml::from_str(data).map_err(|e| format!("data is not a YAML mapping: {}", e))
}

fn process_value(config: &mut Config, payload: Payload) -> std::result::Result<Payload, String> {
    config
        .metadata
        .labels
        .insert(VALUE_LABEL_KEY.to_string(), VALUE_LABEL_TRUE.to_string());
    Ok(payload)
}

/// Switch a labelled document to `Values`. Parsed once per render.
fn for_value_map(config: &Config, payload: Payload) -> std::result::Result<Payload, String> {
    match payload {
        Payload::Document(text) if config.is_value_map() => {
            parse_values(&text).map(Payload::Values)
        }
        other => Ok(other),
    }
}

fn process_to_json(config: &mut Config, payload: Payload) -> std::result::Result<Payload, String> {
    match for_value_map(config, payload)? {
        Payload::Document(text) => {
            if text.trim().is_empty() {
                return Ok(Payload::Document("null".to_string()));
            }
            let json: serde_json::Value = serde_yml::from_str(&text)
                .map_err(|e| format!("failed to read data as YAML: {}", e))?;
            serde_json::to_string(&json)
                .map(Payload::Document)
                .map_err(|e| e.to_string())
        }
        Payload::Values(values) => values
            .into_iter()
            .map(|(key, value)| -> std::result::Result<_, String> {
                let json = serde_json::to_value(&value)
                    .and_then(|json| serde_json::to_string(&json))
                    .map_err(|e| format!("key '{}': {}", key, e))?;
                Ok((key, serde_yml::Value::String(json)))
            })
            .collect::<std::result::Result<_, String>>()
            .map(Payload::Values),
    }
}

fn process_to_base64(
    config: &mut Config,
    payload: Payload,
) -> std::result::Result<Payload, String> {
    match for_value_map(config, payload)? {
        Payload::Document(text) => Ok(Payload::Document(STANDARD.encode(text.as_bytes()))),
        Payload::Values(values) => values
            .into_iter()
            .map(|(key, value)| match value {
                serde_yml::Value::String(text) => Ok((
                    key,
                    serde_yml::Value::String(STANDARD.encode(text.as_bytes())),
                )),
                _ => Err(format!("value of key '{}' is not a string", key)),
            })
            .collect::<std::result::Result<_, String>>()
            .map(Payload::Values),
    }
}

/// Renders configs and persists them into a cluster rootfs.
pub struct Configuration {
    rootfs: PathBuf,
}

impl Configuration {
    pub fn new(rootfs: impl Into<PathBuf>) -> Self {
        Self {
            rootfs: rootfs.into(),
        }
    }

    pub fn target_path(&self, config: &Config) -> PathBuf {
        self.rootfs.join(config.spec.path.trim_start_matches('/'))
    }

    /// Render every config and write it to `<rootfs>/<spec.path>`.
    pub fn dump(&self, configs: &[Config]) -> Result<()> {
        for config in configs {
            if config.spec.path.trim().is_empty() {
                return Err(Error::config_missing_key(
                    "spec.path",
                    Some(format!("config '{}'", config.name())),
                ));
            }

            let mut rendered = config.clone();
            render(&mut rendered)?;

            let target = self.target_path(&rendered);
            if let Some(parent) = target.parent() {
                io::ensure_dir(parent, "create config dir")?;
            }
            io::write_file(&target, &rendered.spec.data, &format!("write config {}", rendered.name()))?;
            log_status!("config", "Wrote {} to {}", rendered.name(), target.display());
        }
        Ok(())
    }

    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> String {
        String::from_utf8(STANDARD.decode(text).unwrap()).unwrap()
    }

    fn rendered(data: &str, process: &str) -> Config {
        let mut config = Config::new("app", "etc/app.yaml", data).with_process(process);
        render(&mut config).unwrap();
        config
    }

    #[test]
    fn no_processors_leaves_data_untouched() {
        let mut config = Config::new("app", "etc/app.yaml", "a: 1\n");
        render(&mut config).unwrap();
        assert_eq!(config.spec.data, "a: 1\n");
        assert!(config.metadata.labels.is_empty());
    }

    #[test]
    fn document_to_json() {
        let config = rendered("config:\n  user: root\n  port: 3306\n", "toJson");
        let json: serde_json::Value = serde_json::from_str(&config.spec.data).unwrap();
        assert_eq!(json["config"]["user"], "root");
        assert_eq!(json["config"]["port"], 3306);
    }

    #[test]
    fn empty_document_to_json_is_null() {
        assert_eq!(rendered("", "toJson").spec.data, "null");
    }

    #[test]
    fn document_to_base64_round_trips() {
        let data = "user: root\npasswd: Seal123\n";
        assert_eq!(decode(&rendered(data, "toBase64").spec.data), data);
    }

    #[test]
    fn value_map_to_base64_encodes_each_value() {
        let config = rendered("user: root\npasswd: Seal123\n", "value|toBase64");
        let map: BTreeMap<String, String> = serde_yml::from_str(&config.spec.data).unwrap();
        assert_eq!(decode(&map["user"]), "root");
        assert_eq!(decode(&map["passwd"]), "Seal123");
        assert!(config.is_value_map());
    }

    #[test]
    fn value_map_to_json_converts_each_value() {
        let config = rendered(
            "config:\n  user: root\nports:\n  - 80\n  - 443\n",
            "value|toJson",
        );
        let map: BTreeMap<String, String> = serde_yml::from_str(&config.spec.data).unwrap();
        assert_eq!(map["config"], r#"{"user":"root"}"#);
        assert_eq!(map["ports"], "[80,443]");
    }

    #[test]
    fn value_to_json_then_base64_chains() {
        let config = rendered("config:\n  user: root\n", "value|toJson|toBase64");
        let map: BTreeMap<String, String> = serde_yml::from_str(&config.spec.data).unwrap();
        assert_eq!(decode(&map["config"]), r#"{"user":"root"}"#);
    }

    #[test]
    fn unknown_processor_is_skipped() {
        let data = "config:\n  user: root\n";
        assert_eq!(
            rendered(data, "value|bogus|toJson").spec.data,
            rendered(data, "value|toJson").spec.data
        );
        assert_eq!(rendered(data, "||bogus").spec.data, data);
    }

    #[test]
    fn base64_of_non_string_value_fails() {
        let mut config =
            Config::new("mysql", "etc/mysql.yaml", "port: 3306\n").with_process("value|toBase64");
        let err = render(&mut config).unwrap_err();

        assert_eq!(err.code.as_str(), "config.render_failed");
        assert_eq!(err.details["config"], "mysql");
        assert_eq!(err.details["processor"], "toBase64");
        assert_eq!(config.spec.data, "port: 3306\n");
        assert!(config.is_value_map());
    }

    #[test]
    fn value_alone_only_sets_the_label() {
        let data = "zeta: 1   # keep me\nalpha: two\n";
        let config = rendered(data, "value");
        assert_eq!(config.spec.data, data);
        assert!(config.is_value_map());

        let list = rendered("- a\n- b\n", "value");
        assert_eq!(list.spec.data, "- a\n- b\n");
    }

    #[test]
    fn labelled_config_without_value_step_is_still_a_map() {
        let mut config = Config::new("app", "etc/app.yaml", "user: root\n").with_process("toBase64");
        config
            .metadata
            .labels
            .insert(VALUE_LABEL_KEY.to_string(), VALUE_LABEL_TRUE.to_string());
        render(&mut config).unwrap();

        let map: BTreeMap<String, String> = serde_yml::from_str(&config.spec.data).unwrap();
        assert_eq!(decode(&map["user"]), "root");
    }

    #[test]
    fn map_processor_on_a_list_fails_and_keeps_data() {
        let mut config = Config::new("bad", "x", "- a\n- b\n").with_process("value|toJson");
        let err = render(&mut config).unwrap_err();
        assert_eq!(err.details["processor"], "toJson");
        assert_eq!(config.spec.data, "- a\n- b\n");
    }

    #[test]
    fn dump_writes_rendered_configs_under_rootfs() {
        let dir = tempfile::tempdir().unwrap();
        let configuration = Configuration::new(dir.path());
        let configs = vec![
            Config::new("plain", "etc/plain.conf", "x=1\n"),
            Config::new("encoded", "/etc/secret/b64", "s3cret").with_process("toBase64"),
        ];

        configuration.dump(&configs).unwrap();

        let plain = std::fs::read_to_string(dir.path().join("etc/plain.conf")).unwrap();
        assert_eq!(plain, "x=1\n");
        let encoded = std::fs::read_to_string(dir.path().join("etc/secret/b64")).unwrap();
        assert_eq!(decode(&encoded), "s3cret");
    }

    #[test]
    fn dump_rejects_config_without_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = Configuration::new(dir.path())
            .dump(&[Config::new("nopath", "", "x")])
            .unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
    }
}
