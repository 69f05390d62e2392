use anyhow::Error;
use thiserror::Error;

/// Application-level error types for s3-bulk-delete.
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 1: Setup errors (InvalidConfig, Io) and internal pipeline errors
/// - 2: Fatal remote-service rejection (RemoteRejected)
#[derive(Error, Debug, PartialEq)]
pub enum S3BulkDeleteError {
    /// Configuration error (non-retryable).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error while reading the input, the skip file or writing the completion log.
    #[error("I/O error: {0}")]
    Io(String),

    /// The remote service rejected a batch with a non-retryable error.
    #[error("Batch {batch} rejected: {}", .messages.join("; "))]
    RemoteRejected { batch: u64, messages: Vec<String> },

    /// General pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl S3BulkDeleteError {
    pub fn exit_code(&self) -> i32 {
        match self {
            S3BulkDeleteError::RemoteRejected { .. } => 2,
            _ => 1,
        }
    }
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<S3BulkDeleteError>() {
        return err.exit_code();
    }
    1
}

/// Message fragments and error codes that S3 uses for conditions worth retrying.
const TRANSIENT_MESSAGE_FRAGMENT: &str = "try again";
const TRANSIENT_ERROR_CODES: [&str; 4] = [
    "InternalError",
    "SlowDown",
    "ServiceUnavailable",
    "RequestTimeout",
];

/// How a failed delete attempt should be handled by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Retry the same batch after reporting the failure to the limiters.
    Transient,
    /// Abort the whole run.
    Fatal,
}

/// A single key the remote service refused to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub key: String,
    pub code: String,
    pub message: String,
}

impl ItemError {
    pub fn is_transient(&self) -> bool {
        TRANSIENT_ERROR_CODES.contains(&self.code.as_str())
            || self
                .message
                .to_ascii_lowercase()
                .contains(TRANSIENT_MESSAGE_FRAGMENT)
    }
}

/// Failure of one delete attempt for a whole batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeleteError {
    /// The request succeeded but some items were rejected. Never empty.
    #[error("{}", summarize(.0))]
    Rejected(Vec<ItemError>),

    /// The request itself failed (network, SDK, throttled request, ...).
    #[error("{0}")]
    Transport(String),
}

impl DeleteError {
    /// Build a `Rejected` error.
    ///
    /// # Panics
    ///
    /// Panics if `errors` is empty: a rejection without any item error cannot
    /// be produced by a well-formed response.
    pub fn rejected(errors: Vec<ItemError>) -> Self {
        assert!(
            !errors.is_empty(),
            "a rejected batch must carry at least one item error"
        );
        DeleteError::Rejected(errors)
    }

    pub fn severity(&self) -> Severity {
        match self {
            DeleteError::Transport(_) => Severity::Transient,
            DeleteError::Rejected(errors) => {
                if errors.iter().all(ItemError::is_transient) {
                    Severity::Transient
                } else {
                    Severity::Fatal
                }
            }
        }
    }

    /// Every underlying message, one per rejected key.
    pub fn messages(&self) -> Vec<String> {
        match self {
            DeleteError::Transport(message) => vec![message.clone()],
            DeleteError::Rejected(errors) => errors
                .iter()
                .map(|e| format!("{}: {}", e.key, e.message))
                .collect(),
        }
    }
}

fn summarize(errors: &[ItemError]) -> String {
    let Some(first) = errors.first() else {
        return String::new();
    };
    match errors.len() - 1 {
        0 => first.message.clone(),
        more => format!("{} (and {} more errors)", first.message, more),
    }
}
