//! Error types for Patentgraph

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using Patentgraph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Patentgraph error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Session errors (E001-E099)
    #[error("Session '{0}' not found. Run `patentgraph sessions` to see all sessions.")]
    SessionNotFound(String),

    #[error("Invalid session id '{0}': ids must be non-empty and must not contain path separators.")]
    InvalidSessionId(String),

    // Network errors (E100-E199)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("LLM request timed out after {0} seconds")]
    Timeout(u64),

    #[error("LLM API error: {0}")]
    LLMError(String),

    // Catalog errors (E200-E299)
    #[error("Records file not found: {0}")]
    RecordsNotFound(PathBuf),

    #[error("Failed to parse records file {path}: {message}")]
    RecordsParse { path: PathBuf, message: String },

    // Store errors (E300-E399)
    #[error("Failed to persist {kind} to {path}: {source}")]
    PersistFailed {
        kind: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "E001",
            Self::InvalidSessionId(_) => "E002",
            Self::NetworkError(_) => "E100",
            Self::HttpStatus { .. } => "E101",
            Self::Timeout(_) => "E102",
            Self::LLMError(_) => "E103",
            Self::RecordsNotFound(_) => "E200",
            Self::RecordsParse { .. } => "E201",
            Self::PersistFailed { .. } => "E300",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Json(_) | Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::SessionNotFound(_) => Some("patentgraph sessions".to_string()),
            Self::InvalidSessionId(_) => Some("patentgraph enrich --new".to_string()),
            Self::NetworkError(_) | Self::Timeout(_) => {
                Some("Check internet connection or raise llm.timeout_secs".to_string())
            }
            Self::HttpStatus { status: 401, .. } | Self::LLMError(_) => {
                Some("Set the PATENTGRAPH_API_KEY environment variable".to_string())
            }
            Self::RecordsNotFound(_) => {
                Some("patentgraph config set data.records_path <path>".to_string())
            }
            _ => None,
        }
    }

    /// Whether the LLM client should retry after this error
    ///
    /// Every failure on the request path is transient from the client's point
    /// of view; configuration and input errors never reach it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::HttpStatus { .. }
                | Self::Timeout(_)
                | Self::LLMError(_)
                | Self::Json(_)
        )
    }
}
