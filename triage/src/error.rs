//! Triage error types
//!
//! Input and configuration errors are fatal and abort a call before any
//! decision is made. Evidence backend errors live in
//! [`crate::evidence::EvidenceError`] and never abort a call.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for triage operations
pub type TriageResult<T> = Result<T, TriageError>;

/// Category of a failure as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing input; resubmitting the same record will fail again
    InputError,
    /// Rules document missing or invalid
    ConfigError,
    /// External backend failed
    BackendError,
    /// Anything else
    InternalError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InputError => write!(f, "input_error"),
            Self::ConfigError => write!(f, "config_error"),
            Self::BackendError => write!(f, "backend_error"),
            Self::InternalError => write!(f, "internal_error"),
        }
    }
}

/// Structured error object emitted in place of a decision.
///
/// # Example Response
/// ```json
/// {
///   "type": "input_error",
///   "message": "missing required field: task",
///   "details": {}
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,

    pub message: String,

    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl StructuredError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: serde_json::Map::new(),
        }
    }

    /// Add a detail key-value pair
    pub fn with_detail(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Whether resubmitting the same input could succeed
    pub fn retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::BackendError | ErrorKind::InternalError)
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for StructuredError {}

/// Errors that abort a triage call
#[derive(Error, Debug)]
pub enum TriageError {
    /// Input record has no `task`
    #[error("missing required field: task")]
    MissingTask,

    /// Input record is not valid
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Rules file not found
    #[error("rules file not found at {path}")]
    RulesNotFound { path: PathBuf },

    /// Rules document failed validation
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Rules document has a version this build does not understand
    #[error("unsupported rules version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TriageError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Caller-facing category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingTask | Self::InvalidInput { .. } | Self::Json(_) => ErrorKind::InputError,
            Self::RulesNotFound { .. }
            | Self::Config { .. }
            | Self::UnsupportedVersion { .. }
            | Self::Yaml(_)
            | Self::Toml(_) => ErrorKind::ConfigError,
            Self::Io(_) => ErrorKind::InternalError,
        }
    }

    /// Convert to the structured object printed for callers
    pub fn to_structured(&self) -> StructuredError {
        let err = StructuredError::new(self.kind(), self.to_string());
        match self {
            Self::MissingTask => err.with_detail("field", "task"),
            Self::RulesNotFound { path } => err.with_detail("path", path.display().to_string()),
            Self::UnsupportedVersion { found, supported } => err
                .with_detail("found", *found)
                .with_detail("supported", *supported),
            _ => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_task_is_input_error() {
        let s = TriageError::MissingTask.to_structured();
        assert_eq!(s.kind, ErrorKind::InputError);
        assert!(!s.retryable());
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["type"], "input_error");
        assert_eq!(json["details"]["field"], "task");
    }

    #[test]
    fn test_config_errors_classified() {
        assert_eq!(TriageError::config("bad").kind(), ErrorKind::ConfigError);
        let e = TriageError::UnsupportedVersion {
            found: 9,
            supported: 1,
        };
        assert_eq!(e.kind(), ErrorKind::ConfigError);
        assert_eq!(e.to_structured().details["found"], 9);
    }

    #[test]
    fn test_display() {
        let s = StructuredError::new(ErrorKind::BackendError, "timed out");
        assert_eq!(s.to_string(), "[backend_error] timed out");
        assert!(s.retryable());
    }
}
