use std::sync::Arc;

use dstore_store::ObjectStore;
use dstore_types::{EntityId, PartitionValue};
use futures::StreamExt;
use tracing::debug;

use crate::codec::{KeyCodec, KeyFilter};
use crate::error::EngineResult;

/// Finds the live object of an entity by listing its entity prefix.
///
/// The search stops at the first key that decodes to the entity, so a
/// healthy bucket costs a single page request.
#[derive(Clone, Debug)]
pub struct EntityLocator {
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn KeyCodec>,
    filter: KeyFilter,
}

impl EntityLocator {
    pub fn new(store: Arc<dyn ObjectStore>, codec: Arc<dyn KeyCodec>, filter: KeyFilter) -> Self {
        Self { store, codec, filter }
    }

    /// Partition value of the entity's object, or `None` if it has none.
    ///
    /// A key under the entity prefix that fails to decode is an error rather
    /// than a miss; a silent miss would let the next write create a second
    /// live object.
    pub async fn locate(&self, entity: &EntityId) -> EngineResult<Option<PartitionValue>> {
        let prefix = self.codec.entity_prefix(entity);
        let mut pages = self.store.list(Some(&prefix), None);

        while let Some(page) = pages.next().await {
            for key in page?.keys {
                if !self.filter.accepts(self.codec.as_ref(), &key) {
                    continue;
                }
                let decoded = self.codec.decode(&key)?;
                if decoded.entity == *entity {
                    debug!(%entity, %key, "located entity");
                    return Ok(Some(decoded.partition));
                }
            }
        }
        debug!(%entity, "entity not present");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EntityFirstCodec;
    use crate::error::EngineError;
    use dstore_store::{Fault, InMemoryObjectStore, StoreCall, StoreOperation};

    fn setup(page_size: usize) -> (Arc<InMemoryObjectStore>, EntityLocator) {
        let store = Arc::new(InMemoryObjectStore::with_page_size(page_size));
        let codec = Arc::new(EntityFirstCodec::new("content", ".json"));
        let locator = EntityLocator::new(store.clone(), codec, KeyFilter::default());
        (store, locator)
    }

    fn id(value: &str) -> EntityId {
        EntityId::new(value).unwrap()
    }

    #[tokio::test]
    async fn finds_partition_of_existing_entity() {
        let (store, locator) = setup(1000);
        store.insert("content/a/2020-01-01.json", "x", None);
        store.insert("content/b/2021-01-01.json", "y", None);

        let found = locator.locate(&id("a")).await.unwrap();
        assert_eq!(found.unwrap().as_str(), "2020-01-01");
    }

    #[tokio::test]
    async fn missing_entity_is_none() {
        let (store, locator) = setup(1000);
        store.insert("content/ab/2020-01-01.json", "x", None);
        assert_eq!(locator.locate(&id("a")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn listing_is_scoped_to_the_entity_prefix() {
        let (store, locator) = setup(1000);
        locator.locate(&id("a")).await.unwrap();
        assert_eq!(store.listed_prefixes(), vec![Some("content/a/".to_string())]);
    }

    #[tokio::test]
    async fn stops_after_first_match() {
        let (store, locator) = setup(1);
        store.insert("content/a/2020-01-01.json", "x", None);
        store.insert("content/a/2021-01-01.json", "y", None);

        let found = locator.locate(&id("a")).await.unwrap();
        assert_eq!(found.unwrap().as_str(), "2020-01-01");
        let pages = store
            .calls()
            .into_iter()
            .filter(|c| matches!(c, StoreCall::ListPage { .. }))
            .count();
        assert_eq!(pages, 1);
    }

    #[tokio::test]
    async fn skips_placeholders() {
        let (store, locator) = setup(1);
        store.insert("content/a/", "", None);
        store.insert("content/a/_.json", "x", None);
        let found = locator.locate(&id("a")).await.unwrap();
        assert!(found.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_key_is_an_error() {
        let (store, locator) = setup(1000);
        store.insert("content/a/nested/2020-01-01.json", "x", None);
        let err = locator.locate(&id("a")).await.unwrap_err();
        assert!(matches!(err, EngineError::MalformedKey { .. }));
    }

    #[tokio::test]
    async fn listing_failure_is_unavailable() {
        let (store, locator) = setup(1000);
        store.inject(Fault::on(StoreOperation::List));
        let err = locator.locate(&id("a")).await.unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
