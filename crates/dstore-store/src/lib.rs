//! Object store capability for dstore.
//!
//! The rest of the workspace only ever talks to storage through the
//! [`ObjectStore`] trait, which exposes the handful of primitives a plain
//! bucket offers: put, get, delete, head and prefix-scoped paginated listing.
//! There is no rename, no transaction and no secondary index.
//!
//! # Storage Backends
//!
//! - [`LiveObjectStore`] -- adapter over the `object_store` crate (S3, local
//!   filesystem, in-memory)
//! - [`InMemoryObjectStore`] -- `BTreeMap`-based fake with configurable page
//!   size, fault injection and a call log, for tests
//!
//! # Contract
//!
//! 1. A missing object is `Ok(None)` from [`ObjectStore::get`], never an error.
//! 2. Deleting a missing object succeeds.
//! 3. Listing is driven by the caller: dropping the page stream stops
//!    pagination.
//! 4. Prefixes passed to [`ObjectStore::list`] end at a `/` boundary.

pub mod error;
pub mod live;
pub mod memory;
pub mod object;
pub mod traits;

pub use error::{StoreError, StoreOperation, StoreResult};
pub use live::LiveObjectStore;
pub use memory::{Fault, InMemoryObjectStore, StoreCall};
pub use object::{ListPage, ObjectBody, PutOptions, StoredObject};
pub use traits::{ListStream, ObjectStore};
