use thiserror::Error;

/// Errors produced by type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid entity id {value:?}: {reason}")]
    InvalidEntityId { value: String, reason: String },

    #[error("invalid partition value {value:?}: {reason}")]
    InvalidPartition { value: String, reason: String },
}
