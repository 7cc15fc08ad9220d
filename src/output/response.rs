//! CLI response formatting and output.
//!
//! Provides JSON envelope, printing, and exit code mapping.

use converge::error::Hint;
use converge::{Error, ErrorCode, Result};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<Hint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T: Serialize> CliResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize response".to_string()))
        })
    }
}

impl CliResponse<()> {
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(CliError {
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                details: err.details.clone(),
                hints: if err.hints.is_empty() {
                    None
                } else {
                    Some(err.hints.clone())
                },
                retryable: err.retryable,
            }),
        }
    }
}

fn print_response<T: Serialize>(response: &CliResponse<T>) -> Result<()> {
    use std::io::{self, Write};

    let payload = response.to_json()?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", payload) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(Error::internal_io(
            e.to_string(),
            Some("write stdout".to_string()),
        ));
    }
    Ok(())
}

pub fn map_cmd_result_to_json<T: Serialize>(
    result: Result<(T, i32)>,
) -> (Result<serde_json::Value>, i32) {
    match result {
        Ok((data, exit_code)) => match serde_json::to_value(data) {
            Ok(value) => (Ok(value), exit_code),
            Err(err) => (
                Err(Error::internal_json(
                    err.to_string(),
                    Some("serialize response".to_string()),
                )),
                1,
            ),
        },
        Err(err) => {
            let exit_code = exit_code_for_error(err.code);
            (Err(err), exit_code)
        }
    }
}

pub fn exit_code_for_error(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::ConfigMissingKey
        | ErrorCode::ConfigInvalidYaml
        | ErrorCode::ConfigInvalidValue
        | ErrorCode::ConfigRenderFailed
        | ErrorCode::ValidationMissingArgument
        | ErrorCode::ValidationInvalidArgument
        | ErrorCode::ValidationInvalidJson
        | ErrorCode::PluginInvalidSelector
        | ErrorCode::PluginDuplicateType => 2,

        ErrorCode::SshIdentityFileNotFound
        | ErrorCode::SshConnectFailed
        | ErrorCode::SshNotReady => 10,

        ErrorCode::RemoteCommandFailed
        | ErrorCode::NodeBatchFailed
        | ErrorCode::NodeHostnameNotFound => 20,

        ErrorCode::PluginNotLoaded
        | ErrorCode::InternalIoError
        | ErrorCode::InternalJsonError
        | ErrorCode::InternalUnexpected => 1,
    }
}

pub fn print_json_result(result: Result<serde_json::Value>) -> Result<()> {
    match result {
        Ok(data) => print_response(&CliResponse::success(data)),
        Err(err) => print_response(&CliResponse::<()>::from_error(&err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_map_to_category_exit_codes() {
        let ssh = Error::ssh_connect_failed("10.0.0.2", "timeout");
        let (result, code) = map_cmd_result_to_json::<()>(Err(ssh));
        assert!(result.is_err());
        assert_eq!(code, 10);

        let (_, code) = map_cmd_result_to_json::<()>(Err(Error::config_missing_key("kind", None)));
        assert_eq!(code, 2);

        let (_, code) = map_cmd_result_to_json::<()>(Err(Error::internal_unexpected("boom")));
        assert_eq!(code, 1);
    }

    #[test]
    fn error_envelope_omits_empty_hints() {
        let err = Error::plugin_not_loaded("PreGuest");
        let json = serde_json::to_value(CliResponse::<()>::from_error(&err)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "plugin.not_loaded");
        assert!(json["error"].get("hints").is_none());
        assert!(json.get("data").is_none());
    }
}
