//! Query errors
//!
//! Every failure a wrapper or adapter can produce is reported as a
//! [`QueryError`]. The set of [`ErrorKind`]s is closed so callers can decide
//! what to retry and what to show without knowing which backend call failed.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::gcp::http::ApiError;

/// Failure category of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Wrong number of query parts, an empty part, or an unsupported method
    InvalidQuery,
    /// Scope is not one the wrapper is bound to
    InvalidScope,
    /// Composite key did not split into the expected number of parts
    MalformedKey,
    /// The backend confirmed the resource does not exist
    NotFound,
    /// Transport, authorization or unexpected provider failure
    BackendError,
    /// The query context was cancelled or its deadline passed
    Cancelled,
    /// Mapping code produced an item that failed structural validation
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidQuery => "INVALID_QUERY",
            ErrorKind::InvalidScope => "INVALID_SCOPE",
            ErrorKind::MalformedKey => "MALFORMED_KEY",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::BackendError => "BACKEND_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed query, with enough context to log or display on its own
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message} (scope: {scope}, type: {item_type})")]
pub struct QueryError {
    pub kind: ErrorKind,
    pub message: String,
    pub scope: String,
    pub item_type: String,
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;

impl QueryError {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        scope: impl Into<String>,
        item_type: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            scope: scope.into(),
            item_type: item_type.into(),
        }
    }

    pub fn invalid_query(message: impl Into<String>, scope: &str, item_type: &str) -> Self {
        Self::new(ErrorKind::InvalidQuery, message, scope, item_type)
    }

    pub fn invalid_scope(scope: &str, item_type: &str) -> Self {
        Self::new(
            ErrorKind::InvalidScope,
            format!("scope {} is not bound to this adapter", scope),
            scope,
            item_type,
        )
    }

    pub fn not_found(message: impl Into<String>, scope: &str, item_type: &str) -> Self {
        Self::new(ErrorKind::NotFound, message, scope, item_type)
    }

    pub fn cancelled(message: impl Into<String>, scope: &str, item_type: &str) -> Self {
        Self::new(ErrorKind::Cancelled, message, scope, item_type)
    }

    /// Classify a transport error. A 404 from the API is a confirmed absence,
    /// everything else is a backend failure.
    pub fn from_backend(err: &anyhow::Error, scope: &str, item_type: &str) -> Self {
        let kind = match err.downcast_ref::<ApiError>() {
            Some(api) if api.is_not_found() => ErrorKind::NotFound,
            _ => ErrorKind::BackendError,
        };
        Self::new(kind, format!("{:#}", err), scope, item_type)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_display_carries_context() {
        let err = QueryError::invalid_scope("my-project.us-east1-b", "gcp-compute-disk");
        let text = err.to_string();
        assert!(text.starts_with("INVALID_SCOPE"));
        assert!(text.contains("my-project.us-east1-b"));
        assert!(text.contains("gcp-compute-disk"));
    }

    #[test]
    fn test_from_backend_maps_404_to_not_found() {
        let err = anyhow::Error::new(ApiError::new(StatusCode::NOT_FOUND, "gone"));
        let query_err = QueryError::from_backend(&err, "p.z", "gcp-compute-disk");
        assert_eq!(query_err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_from_backend_keeps_context_chain() {
        let err = anyhow::Error::new(ApiError::new(StatusCode::FORBIDDEN, "denied"))
            .context("Failed to fetch disk");
        let query_err = QueryError::from_backend(&err, "p.z", "gcp-compute-disk");
        assert_eq!(query_err.kind, ErrorKind::BackendError);
        assert!(query_err.message.contains("Failed to fetch disk"));
    }

    #[test]
    fn test_transport_error_is_backend_error() {
        let err = anyhow::anyhow!("connection reset");
        let query_err = QueryError::from_backend(&err, "p.z", "t");
        assert_eq!(query_err.kind, ErrorKind::BackendError);
    }
}
