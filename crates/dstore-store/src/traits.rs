use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::StoreResult;
use crate::object::{ListPage, PutOptions, StoredObject};

/// Stream of listing pages. The stream ends after the last page; dropping it
/// early abandons the remaining pagination.
pub type ListStream<'a> = BoxStream<'a, StoreResult<ListPage>>;

/// Flat key/value object store.
///
/// Implementations must satisfy these rules:
/// - `get` of a missing key returns `Ok(None)`; any other failure is `Err`.
/// - `delete` of a missing key succeeds.
/// - `list` returns keys in the backend's listing order, one page per item,
///   fetching the next page only when polled.
/// - Writes to a single key are last-writer-wins; nothing is atomic across keys.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Store `body` under `key`, replacing any previous object.
    async fn put(&self, key: &str, body: Bytes, options: PutOptions) -> StoreResult<()>;

    /// Open the object stored under `key`.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>>;

    /// Remove the object stored under `key`.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Check whether `key` exists without reading it. Only health checks use
    /// this.
    async fn head_exists(&self, key: &str) -> StoreResult<bool>;

    /// List keys under `prefix` (everything when `None`), at most `page_size`
    /// keys per page when given.
    fn list(&self, prefix: Option<&str>, page_size: Option<usize>) -> ListStream<'_>;
}
