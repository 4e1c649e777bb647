use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ArchiveError;
use crate::params::{self, Settings};
use crate::store::UploadResult;

pub const SUCCESS_MESSAGE: &str = "Logs uploaded successfully";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessReport {
    pub message: String,
    pub bucket: String,
    pub object_name: String,
    pub etag: Option<String>,
    pub url: String,
}

/// The single JSON object printed for an invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Report {
    Success(SuccessReport),
    Failure(Value),
}

impl Report {
    pub fn success(result: UploadResult) -> Self {
        Report::Success(SuccessReport {
            message: SUCCESS_MESSAGE.to_string(),
            bucket: result.bucket,
            object_name: result.object_name,
            etag: result.etag,
            url: result.url,
        })
    }

    pub fn failure(error: &ArchiveError, settings: &Settings) -> Self {
        let body = match error {
            ArchiveError::InvalidArgumentCount { expected, received } => json!({
                "error": "Invalid argument count",
                "expected": expected,
                "received": received,
                "usage": settings.param_names,
                "example": params::EXAMPLE,
            }),
            ArchiveError::InvalidLogCategory { valid, .. } => json!({
                "error": "Invalid log type",
                "valid_values": valid,
            }),
            ArchiveError::RemoteFetch { status, body } => json!({
                "error": format!("HTTP {}", status),
                "status": status,
                "details": body,
            }),
            ArchiveError::ArchiveWrite(cause) => json!({
                "error": "Archive write failed",
                "details": cause,
            }),
            ArchiveError::CredentialConfiguration(cause) => json!({
                "error": "Credential configuration error",
                "details": cause,
            }),
            ArchiveError::Transport(cause) => json!({
                "error": "Log request failed",
                "details": cause,
            }),
            ArchiveError::Signing(cause) => json!({
                "error": "Request signing failed",
                "details": cause,
            }),
        };
        Report::Failure(body)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Report::Success(_))
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            json!({ "error": "Report serialization failed", "details": e.to_string() }).to_string()
        })
    }
}
