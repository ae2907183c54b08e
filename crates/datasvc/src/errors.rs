use std::time::Duration;

/// Max number of characters of a query to include in syntax errors.
const QUERY_SNIPPET_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum DatasvcError {
    #[error("Missing dataset: {id}")]
    NotFound { id: String },

    #[error("Duplicate dataset id: {id}")]
    DuplicateId { id: String },

    #[error("Unsupported file format: '{format}'")]
    UnsupportedFormat { format: String },

    #[error("Malformed {format} input at {location}: {msg}")]
    MalformedInput {
        format: String,
        location: String,
        msg: String,
    },

    #[error("Unsupported query dialect: '{dialect}'")]
    UnsupportedDialect { dialect: String },

    #[error("Syntax error at line {line}, column {col}: {msg}; query: '{query}'")]
    QuerySyntax {
        query: String,
        line: usize,
        col: usize,
        msg: String,
    },

    #[error("Query failed: {msg}")]
    QueryRuntime { msg: String },

    #[error("Query exceeded timeout of {timeout:?}")]
    QueryTimeout { timeout: Duration },

    #[error("Query cancelled")]
    QueryCancelled,

    #[error("Dataset '{id}' was deleted while being queried")]
    DatasetGone { id: String },

    #[error("Invalid dataset id '{id}': {reason}")]
    InvalidId { id: String, reason: &'static str },

    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),

    #[error(transparent)]
    ObjectStorePath(#[from] object_store::path::Error),

    #[error("Failed to encode or decode persisted dataset: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("Query task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("internal: {0}")]
    Internal(String),
}

/// Coarse classification of errors for whatever layer sits in front of the
/// service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadInput,
    Conflict,
    Gone,
    Timeout,
    Internal,
}

impl DatasvcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateId { .. } => ErrorKind::Conflict,
            Self::UnsupportedFormat { .. }
            | Self::MalformedInput { .. }
            | Self::UnsupportedDialect { .. }
            | Self::QuerySyntax { .. }
            | Self::QueryRuntime { .. }
            | Self::InvalidId { .. } => ErrorKind::BadInput,
            Self::QueryTimeout { .. } | Self::QueryCancelled => ErrorKind::Timeout,
            Self::DatasetGone { .. } => ErrorKind::Gone,
            Self::ObjectStore(_)
            | Self::ObjectStorePath(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::Join(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Build a syntax error from a parse error, keeping a bounded snippet of
    /// the offending query.
    pub fn syntax(query: &str, err: dataplay_parser::errors::ParseError) -> Self {
        let mut snippet: String = query.chars().take(QUERY_SNIPPET_LEN).collect();
        if query.chars().nth(QUERY_SNIPPET_LEN).is_some() {
            snippet.push_str("...");
        }
        DatasvcError::QuerySyntax {
            query: snippet,
            line: err.line,
            col: err.col,
            msg: err.msg,
        }
    }

    pub fn malformed(
        format: impl Into<String>,
        location: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        DatasvcError::MalformedInput {
            format: format.into(),
            location: location.into(),
            msg: msg.into(),
        }
    }
}

pub type Result<T, E = DatasvcError> = std::result::Result<T, E>;

#[allow(unused_macros)]
macro_rules! internal {
    ($($arg:tt)*) => {
        crate::errors::DatasvcError::Internal(std::format!($($arg)*))
    };
}
#[allow(unused_imports)]
pub(crate) use internal;

/// Error raised while evaluating a query.
macro_rules! runtime {
    ($($arg:tt)*) => {
        crate::errors::DatasvcError::QueryRuntime { msg: std::format!($($arg)*) }
    };
}
pub(crate) use runtime;

#[cfg(test)]
mod tests {
    use dataplay_parser::errors::ParseError;

    use super::*;

    #[test]
    fn syntax_snippet_truncated() {
        let query = "x".repeat(100);
        let err = DatasvcError::syntax(&query, ParseError::new("bad", 1, 2));
        match err {
            DatasvcError::QuerySyntax {
                query, line, col, ..
            } => {
                assert_eq!(QUERY_SNIPPET_LEN + 3, query.len());
                assert_eq!((1, 2), (line, col));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn kinds() {
        assert_eq!(
            ErrorKind::Conflict,
            DatasvcError::DuplicateId { id: "a".into() }.kind()
        );
        assert_eq!(ErrorKind::Timeout, DatasvcError::QueryCancelled.kind());
        assert_eq!(ErrorKind::Internal, internal!("oops {}", 1).kind());
        assert_eq!(ErrorKind::BadInput, runtime!("bad").kind());
    }
}
