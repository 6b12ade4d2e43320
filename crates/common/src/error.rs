//! Error types for wgui

use thiserror::Error;

/// Result type alias using the wgui Error
pub type Result<T> = std::result::Result<T, Error>;

/// wgui error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid backup: {0}")]
    Format(String),

    #[error("`{command}` failed: {message}")]
    ExternalTool {
        command: String,
        message: String,
        retryable: bool,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used at the API boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Format,
    ExternalTool,
    Storage,
    Unauthorized,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Format => "format",
            ErrorKind::ExternalTool => "external_tool",
            ErrorKind::Storage => "storage",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn peer_not_found(name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "peer".to_string(),
            id: name.into(),
        }
    }

    /// Non-zero exit or unreadable output from an external command
    pub fn tool(command: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ExternalTool {
            command: command.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// External command exceeded its time budget
    pub fn tool_timeout(command: impl Into<String>, seconds: u64) -> Self {
        Error::ExternalTool {
            command: command.into(),
            message: format!("timed out after {}s", seconds),
            retryable: true,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Format(_) => ErrorKind::Format,
            Error::ExternalTool { .. } => ErrorKind::ExternalTool,
            Error::Storage(_) | Error::Io(_) | Error::Serialization(_) => ErrorKind::Storage,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ExternalTool { retryable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::peer_not_found("alice").kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk")).kind(),
            ErrorKind::Storage
        );
        assert_eq!(Error::tool("wg genkey", "boom").kind(), ErrorKind::ExternalTool);
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = Error::tool_timeout("wg show wg0", 10);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out after 10s"));
        assert!(!Error::tool("wg show wg0", "exit 1").is_retryable());
    }
}
