//! Error types for PageBrief.
//!
//! Library crates use [`PageBriefError`] via `thiserror`.
//! The server binary wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all PageBrief operations.
#[derive(Debug, thiserror::Error)]
pub enum PageBriefError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed or disallowed input (bad URL, missing field, illegal transition).
    #[error("{message}")]
    Validation { message: String },

    /// Submitted URL targets a private or internal network.
    #[error("URLs pointing to private or internal networks are not allowed")]
    SsrfRejected,

    /// Page could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Response was neither HTML nor plain text.
    #[error("Unsupported content type: {content_type}")]
    UnsupportedContentType { content_type: String },

    /// Nothing readable remained after markup cleanup.
    #[error("No readable content found on the page")]
    EmptyContent,

    /// Text generation failed or timed out.
    #[error("{0}")]
    Generation(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// No session with the given id.
    #[error("session not found: {id}")]
    NotFound { id: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failure to retrieve a page over HTTP.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("HTTP {status}: {status_text}")]
    Status { status: u16, status_text: String },

    #[error("Failed to fetch URL: {0}")]
    Network(String),

    #[error("Response body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PageBriefError>;

impl PageBriefError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a storage error from any displayable message.
    pub fn storage(msg: impl ToString) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Create a not-found error for a session id.
    pub fn not_found(id: impl ToString) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures raised while fetching or extracting page content.
    pub fn is_extraction_failure(&self) -> bool {
        matches!(
            self,
            Self::Fetch(_) | Self::UnsupportedContentType { .. } | Self::EmptyContent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PageBriefError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = PageBriefError::from(FetchError::Timeout { secs: 15 });
        assert_eq!(err.to_string(), "Request timed out after 15s");

        let err = PageBriefError::from(FetchError::Status {
            status: 404,
            status_text: "Not Found".into(),
        });
        assert_eq!(err.to_string(), "HTTP 404: Not Found");
    }

    #[test]
    fn extraction_failures_are_classified() {
        assert!(PageBriefError::EmptyContent.is_extraction_failure());
        assert!(
            PageBriefError::UnsupportedContentType {
                content_type: "application/pdf".into()
            }
            .is_extraction_failure()
        );
        assert!(PageBriefError::from(FetchError::Network("reset".into())).is_extraction_failure());
        assert!(!PageBriefError::storage("disk full").is_extraction_failure());
        assert!(!PageBriefError::Generation("boom".into()).is_extraction_failure());
    }
}
