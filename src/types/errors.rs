use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure the extraction layer can surface to a caller.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Password missing or wrong. Recoverable: ask again and call
    /// `try_set_password`.
    #[error("Incorrect or missing password")]
    IncorrectPassword,
    #[error("Unsupported archive: {0}")]
    Unsupported(String),
    #[error("Failed to list archive: {0}")]
    List(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// Solid source: the entry exists but no preload pass has fetched it yet.
    #[error("Entry not yet resolved: {0}")]
    NotYetResolved(String),
    #[error("Failed to read '{key}': {reason}")]
    Read { key: String, reason: String },
    #[error("Size mismatch for '{key}': expected {expected} bytes, got {actual}")]
    SizeMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },
    #[error("Unexpected end of stream in '{key}' after {received} of {expected} bytes")]
    UnexpectedEnd {
        key: String,
        expected: u64,
        received: u64,
        dump_path: Option<PathBuf>,
    },
    #[error("Operation cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    pub fn read(key: &str, reason: impl ToString) -> Self {
        ExtractError::Read {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_password_error(&self) -> bool {
        matches!(self, ExtractError::IncorrectPassword)
    }

    /// Errors after which the same call cannot succeed without a new
    /// password or a preload pass.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ExtractError::IncorrectPassword
                | ExtractError::NotYetResolved(_)
                | ExtractError::NotFound(_)
        )
    }
}

impl From<tokio::task::JoinError> for ExtractError {
    fn from(error: tokio::task::JoinError) -> Self {
        ExtractError::Internal(format!("Extraction worker failed: {error}"))
    }
}

impl<T> From<std::sync::PoisonError<T>> for ExtractError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        ExtractError::Internal("Archive state lock poisoned".to_string())
    }
}

// Host UIs receive errors as plain strings
impl Serialize for ExtractError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}

pub type ExtractResult<T> = Result<T, ExtractError>;
