//! Foundation types for dstore.
//!
//! Every stored object belongs to exactly one entity and carries a partition
//! value (a publication date, or nothing). Both end up inside object keys, so
//! they are validated once here and passed around as newtypes afterwards.
//!
//! # Key Types
//!
//! - [`EntityId`]: immutable identifier of a stored item (content UUID, concept filename)
//! - [`PartitionValue`]: mutable partition embedded in the key (publication date)
//! - [`CorrelationId`]: transaction id attached to writes for tracing

pub mod correlation;
pub mod entity;
pub mod error;

pub use correlation::CorrelationId;
pub use entity::{EntityId, PartitionValue, RESERVED_MARKER};
pub use error::TypeError;
