//! JSON envelope shared by every command's `--json` output.

use serde::Serialize;

use crate::error::StoreError;
use crate::io::exit_code::ExitCode;

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    #[must_use]
    pub fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Text }
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Whether a command finished normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Envelope printed under `--json`: `data` on success, `error` on failure,
/// never both.
#[derive(Debug, Serialize)]
pub struct JsonResponse<T: Serialize = serde_json::Value> {
    pub status: Status,
    /// `OK`, or the failing error's status code such as `LOCK_TIMEOUT`.
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    pub exit_code: u8,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub suggestions: Vec<String>,
    /// Set when running the same command again may succeed.
    pub retryable: bool,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: Status::Success,
            code: "OK".into(),
            message: "ok".into(),
            data: Some(data),
            error: None,
            exit_code: ExitCode::Success as u8,
            timestamp: now(),
        }
    }
}

impl JsonResponse {
    pub fn from_error(error: &StoreError) -> Self {
        let details = ErrorDetails {
            suggestions: error
                .recovery_suggestions()
                .into_iter()
                .map(String::from)
                .collect(),
            retryable: error.is_retryable(),
        };
        Self {
            status: Status::Error,
            code: error.status_code().into(),
            message: error.to_string(),
            data: None,
            error: Some(details),
            exit_code: ExitCode::from_error(error) as u8,
            timestamp: now(),
        }
    }
}
