//! Addressing and consistency layer for dstore.
//!
//! An entity (a content UUID, a concept filename) is stored as exactly one
//! object whose key embeds a mutable partition value, usually the publication
//! date. The object store underneath offers no rename and no index, so this
//! crate owns the rules that keep the bucket coherent:
//!
//! - [`codec`]: the key scheme. The entity id is always the first variable
//!   segment, so one prefix-scoped listing finds every object of an entity.
//! - [`locator`]: finds the partition value of an entity's live object.
//! - [`writer`]: upsert and delete; a partition change writes the new key,
//!   deletes the old one, and undoes the write if that delete fails.
//! - [`lister`]: filtered, restartable enumeration of a collection.
//! - [`exporter`]: bounded worker pool streaming every object into one pipe,
//!   cancelled as soon as the reader goes away.
//! - [`collection`]: the facade tying one bucket prefix to all of the above.
//! - [`ingest`]: adapter turning queue messages into writes.

pub mod codec;
pub mod collection;
pub mod error;
pub mod exporter;
pub mod ingest;
pub mod lister;
pub mod locator;
pub mod writer;

pub use codec::{verify_entity_scoping, DecodedKey, EntityFirstCodec, KeyCodec, KeyFilter};
pub use collection::{Collection, CollectionConfig};
pub use error::{Compensation, EngineError, EngineResult, ErrorKind};
pub use exporter::{BulkExporter, ExportConfig, ExportReader};
pub use ingest::{IngestOutcome, IngestProcessor, QueueMessage};
pub use lister::BulkLister;
pub use locator::EntityLocator;
pub use writer::{EntityLocks, VersionedWriter, WriteOutcome, WriteRequest};
