use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    WorkspaceUninitialized,

    ConfigMissingKey,
    ConfigInvalidToml,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    PartitionOutOfRange,

    ArtifactMissing,
    ArtifactInvalid,

    StageUnknown,

    RemoteDispatchFailed,
    TrainerFailed,
    LockUnavailable,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::WorkspaceUninitialized => "workspace.uninitialized",

            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidToml => "config.invalid_toml",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::PartitionOutOfRange => "partition.out_of_range",

            ErrorCode::ArtifactMissing => "artifact.missing",
            ErrorCode::ArtifactInvalid => "artifact.invalid",

            ErrorCode::StageUnknown => "stage.unknown",

            ErrorCode::RemoteDispatchFailed => "remote.dispatch_failed",
            ErrorCode::TrainerFailed => "trainer.failed",
            ErrorCode::LockUnavailable => "lock.unavailable",

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
pub struct WorkspaceUninitializedDetails {
    pub root: String,
    pub signature_file: String,
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
pub struct ConfigInvalidTomlDetails {
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
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionOutOfRangeDetails {
    pub task_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDetails {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageUnknownDetails {
    pub stage: String,
    pub known: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDispatchFailedDetails {
    pub host: String,
    pub command: String,
    pub exit_code: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainerFailedDetails {
    pub exit_code: i32,
    pub context: String,
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

    pub fn workspace_uninitialized(
        root: impl Into<String>,
        signature_file: impl Into<String>,
    ) -> Self {
        let details = serde_json::to_value(WorkspaceUninitializedDetails {
            root: root.into(),
            signature_file: signature_file.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::WorkspaceUninitialized,
            "Directory is not a puzzle workspace",
            details,
        )
        .with_hint("Run 'gridhand init <dir>' to initialize a workspace")
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let details = serde_json::to_value(ConfigMissingKeyDetails {
            key: key.into(),
            path,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ConfigMissingKey,
            "Missing required configuration key",
            details,
        )
    }

    pub fn config_invalid_toml(path: impl Into<String>, err: toml::de::Error) -> Self {
        let details = serde_json::to_value(ConfigInvalidTomlDetails {
            path: path.into(),
            error: err.to_string(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ConfigInvalidToml,
            "Invalid TOML in configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = serde_json::to_value(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = serde_json::to_value(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn partition_out_of_range(task_id: i64) -> Self {
        let details = serde_json::to_value(PartitionOutOfRangeDetails { task_id })
            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::PartitionOutOfRange,
            "Task identifier outside the partition range",
            details,
        )
    }

    pub fn artifact_missing(path: impl Into<String>) -> Self {
        let details = serde_json::to_value(ArtifactDetails {
            path: path.into(),
            problem: None,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(ErrorCode::ArtifactMissing, "Artifact not found", details)
    }

    pub fn artifact_invalid(path: impl Into<String>, problem: impl Into<String>) -> Self {
        let details = serde_json::to_value(ArtifactDetails {
            path: path.into(),
            problem: Some(problem.into()),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ArtifactInvalid,
            "Artifact contents are invalid",
            details,
        )
    }

    pub fn stage_unknown(stage: impl Into<String>, known: Vec<String>) -> Self {
        let hint = format!("Known stages: {}", known.join(", "));
        let details = serde_json::to_value(StageUnknownDetails {
            stage: stage.into(),
            known,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(ErrorCode::StageUnknown, "Unknown pipeline stage", details).with_hint(hint)
    }

    pub fn remote_dispatch_failed(
        host: impl Into<String>,
        command: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        let details = serde_json::to_value(RemoteDispatchFailedDetails {
            host: host.into(),
            command: command.into(),
            exit_code,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        let mut err = Self::new(
            ErrorCode::RemoteDispatchFailed,
            "Remote stage dispatch failed",
            details,
        );
        err.retryable = Some(true);
        err
    }

    pub fn trainer_failed(exit_code: i32, context: impl Into<String>) -> Self {
        let details = serde_json::to_value(TrainerFailedDetails {
            exit_code,
            context: context.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(ErrorCode::TrainerFailed, "Trainer process failed", details)
    }

    pub fn lock_unavailable(reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        Self::new(
            ErrorCode::LockUnavailable,
            "Device lock unavailable",
            serde_json::json!({ "reason": reason }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::to_value(InternalIoErrorDetails {
            error: error.into(),
            context,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::to_value(InternalJsonErrorDetails {
            error: error.into(),
            context,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        let error: String = error.into();
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_dotted_and_stable() {
        assert_eq!(
            ErrorCode::WorkspaceUninitialized.as_str(),
            "workspace.uninitialized"
        );
        assert_eq!(
            ErrorCode::PartitionOutOfRange.as_str(),
            "partition.out_of_range"
        );
        assert_eq!(ErrorCode::StageUnknown.as_str(), "stage.unknown");
    }

    #[test]
    fn details_serialize_camel_case() {
        let err = Error::remote_dispatch_failed("gpu.example.edu", "./gridhand solve2", 255);
        assert_eq!(err.details["exitCode"], 255);
        assert_eq!(err.retryable, Some(true));
    }

    #[test]
    fn stage_unknown_lists_known_stages() {
        let err = Error::stage_unknown("trian_rob", vec!["train_rob".to_string()]);
        assert_eq!(err.hints.len(), 1);
        assert!(err.hints[0].message.contains("train_rob"));
    }

    #[test]
    fn uninitialized_workspace_hints_at_init() {
        let err = Error::workspace_uninitialized("/tmp/ws", ".puzzle_workspace");
        assert!(err.hints[0].message.contains("gridhand init"));
    }
}
