//! Error types for provider transfers

use std::fmt;
use std::path::PathBuf;

/// One failed entry inside an otherwise successful batch response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub key: String,
    pub reason: String,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.key, self.reason)
    }
}

/// Which provider limit a file ran into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimit {
    /// Largest object accepted by a single-shot upload
    SingleObject,
    /// Largest object that can be assembled from segments
    Multipart,
}

impl fmt::Display for SizeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeLimit::SingleObject => write!(f, "single object"),
            SizeLimit::Multipart => write!(f, "multipart object"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error(
        "File too large: {path:?} is {size} bytes, {provider} {limit_kind} limit is {limit} bytes"
    )]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
        limit_kind: SizeLimit,
        provider: &'static str,
    },

    #[error("{operation} failed: {message}")]
    Transport {
        operation: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{operation}: {} item(s) failed: {}", .failures.len(), join_failures(.failures))]
    BatchOperation {
        operation: String,
        failures: Vec<ItemFailure>,
    },

    #[error("Max retries ({retries}) exceeded for operation '{operation}': {source}")]
    RetriesExhausted {
        operation: String,
        retries: u32,
        #[source]
        source: Box<CloudError>,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CloudError>;

impl CloudError {
    /// Build a transport error without an underlying source
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Transport {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Build an I/O error tied to a local path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CloudError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_response(provider: &'static str, message: impl Into<String>) -> Self {
        CloudError::InvalidResponse {
            provider,
            message: message.into(),
        }
    }

    /// Whether a retry could possibly change the outcome
    ///
    /// Local I/O failures are not retried: the source file is gone or unreadable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CloudError::FileTooLarge { .. } | CloudError::Config(_) | CloudError::Io { .. }
        )
    }

    /// True if this error, or the failure it wraps, is a size-limit violation
    pub fn is_file_too_large(&self) -> bool {
        match self {
            CloudError::FileTooLarge { .. } => true,
            CloudError::RetriesExhausted { source, .. } => source.is_file_too_large(),
            _ => false,
        }
    }

    /// True if the local source file no longer exists
    pub fn is_missing_source(&self) -> bool {
        match self {
            CloudError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            CloudError::RetriesExhausted { source, .. } => source.is_missing_source(),
            _ => false,
        }
    }

    /// Per-item failures carried by this error or the failure it wraps
    pub fn item_failures(&self) -> &[ItemFailure] {
        match self {
            CloudError::BatchOperation { failures, .. } => failures,
            CloudError::RetriesExhausted { source, .. } => source.item_failures(),
            _ => &[],
        }
    }
}

fn join_failures(failures: &[ItemFailure]) -> String {
    failures
        .iter()
        .map(ItemFailure::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
