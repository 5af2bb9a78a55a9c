use std::sync::Arc;

use dstore_store::ObjectStore;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use futures::future;

use crate::codec::{KeyCodec, KeyFilter};
use crate::error::{EngineError, EngineResult};

/// Enumerates the keys of one collection.
///
/// Each call to [`BulkLister::keys`] starts a fresh listing from the top, and
/// pages are only requested as the stream is polled.
#[derive(Clone, Debug)]
pub struct BulkLister {
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn KeyCodec>,
    filter: KeyFilter,
}

impl BulkLister {
    pub fn new(store: Arc<dyn ObjectStore>, codec: Arc<dyn KeyCodec>, filter: KeyFilter) -> Self {
        Self { store, codec, filter }
    }

    pub fn codec(&self) -> &Arc<dyn KeyCodec> {
        &self.codec
    }

    /// Request a single one-key page to prove the store is reachable.
    pub async fn precheck(&self) -> EngineResult<()> {
        let prefix = self.codec.collection_prefix();
        let mut pages = self.store.list(prefix.as_deref(), Some(1));
        match pages.next().await {
            Some(Err(e)) => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Filtered keys of the collection, in listing order.
    ///
    /// A listing failure is yielded as the last item.
    pub fn keys(&self) -> BoxStream<'_, EngineResult<String>> {
        let prefix = self.codec.collection_prefix();
        self.store
            .list(prefix.as_deref(), None)
            .map_err(EngineError::from)
            .map_ok(|page| stream::iter(page.keys.into_iter().map(Ok::<_, EngineError>)))
            .try_flatten()
            .try_filter(move |key| future::ready(self.filter.accepts(self.codec.as_ref(), key)))
            .boxed()
    }

    /// Number of entity objects in the collection. Keys are not decoded.
    pub async fn count(&self) -> EngineResult<u64> {
        self.keys().try_fold(0u64, |n, _| future::ready(Ok(n + 1))).await
    }
}
