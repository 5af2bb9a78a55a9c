use std::fmt;

/// Store primitive an error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Put,
    Get,
    /// Streaming the body of an object after a successful get.
    Read,
    Delete,
    Head,
    List,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Put => "put",
            Self::Get => "get",
            Self::Read => "read",
            Self::Delete => "delete",
            Self::Head => "head",
            Self::List => "list",
        };
        f.write_str(name)
    }
}

/// Errors from object store operations.
///
/// "Not found" is not an error; see [`crate::ObjectStore::get`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected or failed the request.
    #[error("{operation} {key:?} failed: {message}")]
    Backend {
        operation: StoreOperation,
        key: String,
        message: String,
    },

    /// The key cannot be represented by the backend.
    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// The backend could not be constructed.
    #[error("store configuration error: {0}")]
    Config(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn backend(operation: StoreOperation, key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Backend {
            operation,
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Operation that failed, when known.
    pub fn operation(&self) -> Option<StoreOperation> {
        match self {
            Self::Backend { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
