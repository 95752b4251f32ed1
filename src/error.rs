//! Error types for Stackup

use crate::diagnostics::DiagnosticKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for Stackup operations
pub type Result<T> = std::result::Result<T, StackError>;

/// Stackup error types
#[derive(Error, Debug)]
pub enum StackError {
    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    #[error("Missing variable {name}: {message}")]
    MissingVariable { name: String, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to launch service {service}: {message}")]
    Launch { service: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl StackError {
    /// Create a parse error for a file
    pub fn parse(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        StackError::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Diagnostic category this error is reported under
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            StackError::Parse { .. } | StackError::Json(_) => {
                DiagnosticKind::ParseFailure
            }
            StackError::NotFound(_) => DiagnosticKind::NotFound,
            StackError::CycleDetected(_) => DiagnosticKind::CycleDetected,
            StackError::MissingVariable { .. } => DiagnosticKind::MissingVariable,
            StackError::Validation(_) => DiagnosticKind::ValidationFailure,
            StackError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                DiagnosticKind::NotFound
            }
            StackError::Launch { .. } | StackError::Io(_) | StackError::Lock(_) => {
                DiagnosticKind::Runtime
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = StackError::MissingVariable {
            name: "A".to_string(),
            message: "required".to_string(),
        };
        assert_eq!(err.kind(), DiagnosticKind::MissingVariable);
        assert_eq!(
            StackError::CycleDetected("a -> a".to_string()).kind(),
            DiagnosticKind::CycleDetected
        );

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(StackError::from(io).kind(), DiagnosticKind::NotFound);
    }

    #[test]
    fn test_parse_display() {
        let err = StackError::parse("/tmp/compose.yaml", "bad indent");
        assert_eq!(
            err.to_string(),
            "Failed to parse /tmp/compose.yaml: bad indent"
        );
    }
}
