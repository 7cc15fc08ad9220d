use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidYaml,
    ConfigInvalidValue,
    ConfigRenderFailed,

    ValidationMissingArgument,
    ValidationInvalidArgument,
    ValidationInvalidJson,

    SshIdentityFileNotFound,
    SshConnectFailed,
    SshNotReady,

    RemoteCommandFailed,

    PluginInvalidSelector,
    PluginNotLoaded,
    PluginDuplicateType,

    NodeBatchFailed,
    NodeHostnameNotFound,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidYaml => "config.invalid_yaml",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ConfigRenderFailed => "config.render_failed",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationInvalidJson => "validation.invalid_json",

            ErrorCode::SshIdentityFileNotFound => "ssh.identity_file_not_found",
            ErrorCode::SshConnectFailed => "ssh.connect_failed",
            ErrorCode::SshNotReady => "ssh.not_ready",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",

            ErrorCode::PluginInvalidSelector => "plugin.invalid_selector",
            ErrorCode::PluginNotLoaded => "plugin.not_loaded",
            ErrorCode::PluginDuplicateType => "plugin.duplicate_type",

            ErrorCode::NodeBatchFailed => "node.batch_failed",
            ErrorCode::NodeHostnameNotFound => "node.hostname_not_found",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidYamlDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRenderFailedDetails {
    pub config: String,
    pub processor: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub output: String,
    pub host: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConnectFailedDetails {
    pub host: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshIdentityFileNotFoundDetails {
    pub host: String,
    pub identity_file: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostFailure {
    pub host: String,
    pub code: String,
    pub message: String,
    pub details: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailedDetails {
    pub operation: String,
    pub attempted: usize,
    pub failures: Vec<HostFailure>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let field = field.into();
        let message = format!("Invalid {}: {}", field, problem);
        Self::new(
            ErrorCode::ValidationInvalidArgument,
            message,
            to_details(InvalidArgumentDetails {
                field,
                problem,
                id,
                tried,
            }),
        )
    }

    pub fn validation_invalid_json(err: serde_json::Error, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": err.to_string(),
            "context": context,
        });

        Self::new(ErrorCode::ValidationInvalidJson, "Invalid JSON", details)
    }

    pub fn ssh_identity_file_not_found(
        host: impl Into<String>,
        identity_file: impl Into<String>,
    ) -> Self {
        let identity_file = identity_file.into();
        Self::new(
            ErrorCode::SshIdentityFileNotFound,
            format!("SSH identity file not found: {}", identity_file),
            to_details(SshIdentityFileNotFoundDetails {
                host: host.into(),
                identity_file,
            }),
        )
    }

    pub fn ssh_connect_failed(host: impl Into<String>, error: impl Into<String>) -> Self {
        let host = host.into();
        let error = error.into();
        Self::new(
            ErrorCode::SshConnectFailed,
            format!("Failed to connect to {}: {}", host, error),
            to_details(SshConnectFailedDetails { host, error }),
        )
    }

    pub fn ssh_not_ready(hosts: Vec<String>, attempts: u32) -> Self {
        Self::new(
            ErrorCode::SshNotReady,
            format!(
                "SSH not ready after {} attempts on: {}",
                attempts,
                hosts.join(", ")
            ),
            serde_json::json!({ "hosts": hosts, "attempts": attempts }),
        )
        .with_hint("Check that sshd is running and the cluster's SSH credentials are valid")
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        let message = format!(
            "Remote command failed on {} (exit {}): {}",
            details.host, details.exit_code, details.command
        );
        Self::new(ErrorCode::RemoteCommandFailed, message, to_details(details))
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let key = key.into();
        Self::new(
            ErrorCode::ConfigMissingKey,
            format!("Missing required configuration key '{}'", key),
            to_details(ConfigMissingKeyDetails { key, path }),
        )
    }

    pub fn config_invalid_yaml(path: impl Into<String>, error: impl Into<String>) -> Self {
        let path = path.into();
        let error = error.into();
        Self::new(
            ErrorCode::ConfigInvalidYaml,
            format!("Invalid YAML in {}: {}", path, error),
            to_details(ConfigInvalidYamlDetails { path, error }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value for '{}': {}", key, problem),
            to_details(ConfigInvalidValueDetails {
                key,
                value,
                problem,
            }),
        )
    }

    pub fn config_render_failed(
        config: impl Into<String>,
        processor: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let config = config.into();
        let processor = processor.into();
        let error = error.into();
        Self::new(
            ErrorCode::ConfigRenderFailed,
            format!("{}: config '{}' failed: {}", processor, config, error),
            to_details(ConfigRenderFailedDetails {
                config,
                processor,
                error,
            }),
        )
    }

    pub fn plugin_invalid_selector(on: impl Into<String>, problem: impl Into<String>) -> Self {
        let on = on.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::PluginInvalidSelector,
            format!("Invalid plugin selector '{}': {}", on, problem),
            serde_json::json!({ "on": on, "problem": problem }),
        )
    }

    pub fn plugin_not_loaded(phase: impl Into<String>) -> Self {
        let phase = phase.into();
        Self::new(
            ErrorCode::PluginNotLoaded,
            format!("Plugins must be loaded before running phase {}", phase),
            serde_json::json!({ "phase": phase }),
        )
    }

    pub fn plugin_duplicate_type(type_tag: impl Into<String>) -> Self {
        let type_tag = type_tag.into();
        Self::new(
            ErrorCode::PluginDuplicateType,
            format!("Plugin handler for type '{}' is already registered", type_tag),
            serde_json::json!({ "type": type_tag }),
        )
    }

    /// Aggregate of per-host failures from one batch. The message leads with
    /// the first failure in input order; every failure is kept in `details`.
    pub fn node_batch_failed(
        operation: impl Into<String>,
        attempted: usize,
        failures: Vec<(String, Error)>,
    ) -> Self {
        let operation = operation.into();
        let lead = failures
            .first()
            .map(|(host, err)| format!("{}: {}", host, err.message))
            .unwrap_or_default();
        let message = if failures.len() > 1 {
            format!(
                "{} failed on {} of {} hosts; first: {}",
                operation,
                failures.len(),
                attempted,
                lead
            )
        } else {
            format!("{} failed on {}", operation, lead)
        };

        let failures = failures
            .into_iter()
            .map(|(host, err)| HostFailure {
                host,
                code: err.code.as_str().to_string(),
                message: err.message,
                details: err.details,
            })
            .collect();

        Self::new(
            ErrorCode::NodeBatchFailed,
            message,
            to_details(BatchFailedDetails {
                operation,
                attempted,
                failures,
            }),
        )
    }

    pub fn node_hostname_not_found(ip: impl Into<String>, master: impl Into<String>) -> Self {
        let ip = ip.into();
        let master = master.into();
        Self::new(
            ErrorCode::NodeHostnameNotFound,
            format!("No cluster node with internal IP {} (queried {})", ip, master),
            serde_json::json!({ "ip": ip, "master": master }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        let message = match &context {
            Some(ctx) => format!("IO error ({}): {}", ctx, error),
            None => format!("IO error: {}", error),
        };
        Self::new(
            ErrorCode::InternalIoError,
            message,
            to_details(InternalIoErrorDetails { error, context }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalJsonErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalUnexpected,
            error.clone(),
            serde_json::json!({ "error": error }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Prefix the message with extra context while keeping code and details.
    pub fn with_context(mut self, context: impl std::fmt::Display) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }
}
