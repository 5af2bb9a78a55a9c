use std::fmt;

use dstore_store::StoreError;
use dstore_types::{EntityId, TypeError};

/// Result of the compensating delete issued after a failed rename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Compensation {
    /// The freshly written key was removed; the previous object is the only
    /// live one again.
    Deleted,
    /// The freshly written key could not be removed; both objects are live.
    Failed(String),
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deleted => f.write_str("succeeded"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Coarse classification handed to callers instead of store vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Unavailable,
    Internal,
}

/// Errors from engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No live object exists for the entity.
    #[error("entity not found: {0}")]
    NotFound(EntityId),

    /// A listed key could not be decoded into (entity, partition).
    #[error("malformed object key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    /// The request carried an invalid entity id or partition value.
    #[error("invalid request: {0}")]
    Invalid(#[from] TypeError),

    /// A partitioned collection was written without a partition value.
    #[error("collection {collection} requires a partition value")]
    MissingPartition { collection: String },

    /// An unpartitioned collection was written with a partition value.
    #[error("collection {collection} does not take a partition value")]
    UnexpectedPartition { collection: String },

    /// The entity id collides with the collection's reserved marker.
    #[error("entity id {0} uses the reserved marker")]
    ReservedEntity(EntityId),

    /// The key codec does not scope listings to a single entity.
    #[error("key codec violates entity scoping: {0}")]
    CodecInvariant(String),

    /// The object store failed.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] StoreError),

    /// The new object was written but the old one could not be removed.
    #[error(
        "rename of {entity} failed deleting {old_key:?}: {source}; \
         compensating delete of {new_key:?} {compensation}"
    )]
    PartialFailure {
        entity: EntityId,
        old_key: String,
        new_key: String,
        #[source]
        source: StoreError,
        compensation: Compensation,
    },
}

impl EngineError {
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Invalid(_)
            | Self::MissingPartition { .. }
            | Self::UnexpectedPartition { .. }
            | Self::ReservedEntity(_) => ErrorKind::BadRequest,
            Self::Unavailable(_) | Self::PartialFailure { .. } => ErrorKind::Unavailable,
            Self::MalformedKey { .. } | Self::CodecInvariant(_) => ErrorKind::Internal,
        }
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
