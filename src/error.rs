use serde::Serialize;
use thiserror::Error;

/// Crate-wide error taxonomy. Every fallible operation in the core returns
/// `CoreResult<T>`; the RPC loop is the only place these get turned into a
/// response string for a caller.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("query syntax error: {0}")]
    QuerySyntax(String),

    #[error("embedder error: {0}")]
    Embedder(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("watcher error: {0}")]
    Watcher(String),

    #[error("path not allowed: {0}")]
    PathNotAllowed(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    /// Descriptive kind tag surfaced on the RPC boundary, not used for control flow internally.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Configuration(_) => "configuration",
            CoreError::Io(_) => "io",
            CoreError::Parse(_) => "parse",
            CoreError::QuerySyntax(_) => "query_syntax",
            CoreError::Embedder(_) => "embedder",
            CoreError::Store(_) => "store",
            CoreError::Watcher(_) => "watcher",
            CoreError::PathNotAllowed(_) => "path_not_allowed",
            CoreError::FileNotFound(_) => "file_not_found",
            CoreError::Sqlite(_) => "store",
            CoreError::Pool(_) => "store",
            CoreError::Serde(_) => "parse",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

impl From<&CoreError> for ErrorResponse {
    fn from(err: &CoreError) -> Self {
        ErrorResponse {
            error: err.to_string(),
            kind: err.kind(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_round_trips_every_variant_kind() {
        let cases: Vec<CoreError> = vec![
            CoreError::Configuration("bad config".to_string()),
            CoreError::Parse("bad parse".to_string()),
            CoreError::QuerySyntax("bad query".to_string()),
            CoreError::Embedder("bad embedder".to_string()),
            CoreError::Store("bad store".to_string()),
            CoreError::Watcher("bad watcher".to_string()),
            CoreError::PathNotAllowed("../etc/passwd".to_string()),
            CoreError::FileNotFound("missing.md".to_string()),
        ];

        for err in &cases {
            let response = ErrorResponse::from(err);
            assert!(!response.error.is_empty());
            assert!(!response.kind.is_empty());
        }
    }

    #[test]
    fn configuration_error_reports_its_own_kind_and_message() {
        let err = CoreError::Configuration("MEMEX_SOURCE_PATH is required".to_string());
        let response = ErrorResponse::from(&err);

        assert_eq!(response.kind, "configuration");
        assert!(response.error.contains("MEMEX_SOURCE_PATH is required"));
    }
}
