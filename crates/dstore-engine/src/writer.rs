//! Upsert and delete with at most one live object per entity.
//!
//! A partition change is a rename, and the store has no rename: the new key
//! is written first, then the old key is deleted. When that delete fails the
//! new key is deleted again so the entity is left with its previous object,
//! and the caller gets a [`EngineError::PartialFailure`] describing both
//! steps.
//!
//! Concurrent writes to the same entity from one process are serialised by
//! [`EntityLocks`]. Writers in other processes are not coordinated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dstore_store::{ObjectStore, PutOptions};
use dstore_types::{CorrelationId, EntityId, PartitionValue};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::codec::KeyCodec;
use crate::error::{Compensation, EngineError, EngineResult};
use crate::locator::EntityLocator;

/// One upsert.
#[derive(Clone, Debug)]
pub struct WriteRequest {
    pub entity: EntityId,
    pub partition: PartitionValue,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub correlation_id: CorrelationId,
}

impl WriteRequest {
    pub fn new(entity: EntityId, partition: PartitionValue, body: impl Into<Bytes>) -> Self {
        Self {
            entity,
            partition,
            body: body.into(),
            content_type: None,
            correlation_id: CorrelationId::generate(),
        }
    }

    pub fn with_content_type(mut self, content_type: Option<&str>) -> Self {
        self.content_type = content_type.map(str::to_string);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// What a successful write did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No object existed for the entity.
    Created,
    /// The object was overwritten under its existing key.
    UpdatedInPlace,
    /// The object moved from `previous` to the requested partition.
    Updated { previous: PartitionValue },
}

impl WriteOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created)
    }
}

/// Per-entity async locks, created on demand and dropped with their last
/// holder.
#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<EntityId, Arc<tokio::sync::Mutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, entity: &EntityId) -> EntityGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock poisoned");
            locks.entry(entity.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        EntityGuard {
            locks: self,
            entity: entity.clone(),
            guard: Some(guard),
        }
    }

    /// Number of entities with a lock currently held or awaited.
    pub fn active(&self) -> usize {
        self.locks.lock().expect("lock poisoned").len()
    }
}

/// Holds an entity lock until dropped.
pub struct EntityGuard<'a> {
    locks: &'a EntityLocks,
    entity: EntityId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.locks.lock().expect("lock poisoned");
        if locks
            .get(&self.entity)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.entity);
        }
    }
}

/// Applies writes and deletes through the locate, put, delete protocol.
#[derive(Clone, Debug)]
pub struct VersionedWriter {
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn KeyCodec>,
    locator: EntityLocator,
    locks: Option<Arc<EntityLocks>>,
}

impl VersionedWriter {
    pub fn new(store: Arc<dyn ObjectStore>, codec: Arc<dyn KeyCodec>, locator: EntityLocator) -> Self {
        Self {
            store,
            codec,
            locator,
            locks: None,
        }
    }

    /// Serialise writes and deletes of the same entity through `locks`.
    pub fn with_locks(mut self, locks: Arc<EntityLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    async fn lock(&self, entity: &EntityId) -> Option<EntityGuard<'_>> {
        match &self.locks {
            Some(locks) => Some(locks.acquire(entity).await),
            None => None,
        }
    }

    pub async fn write(&self, request: WriteRequest) -> EngineResult<WriteOutcome> {
        let WriteRequest {
            entity,
            partition,
            body,
            content_type,
            correlation_id,
        } = request;
        let _guard = self.lock(&entity).await;

        let previous = self.locator.locate(&entity).await?;
        let new_key = self.codec.encode(&entity, &partition);
        let options = PutOptions::new()
            .content_type(content_type.as_deref())
            .metadata(CorrelationId::METADATA_KEY, correlation_id.as_str());

        if let Err(e) = self.store.put(&new_key, body, options).await {
            error!(%entity, key = %new_key, %correlation_id, error = %e, "failed to write object");
            return Err(e.into());
        }

        let previous = match previous {
            None => {
                info!(%entity, key = %new_key, %correlation_id, "created object");
                return Ok(WriteOutcome::Created);
            }
            Some(previous) if previous == partition => {
                debug!(%entity, key = %new_key, %correlation_id, "updated object in place");
                return Ok(WriteOutcome::UpdatedInPlace);
            }
            Some(previous) => previous,
        };

        let old_key = self.codec.encode(&entity, &previous);
        match self.store.delete(&old_key).await {
            Ok(()) => {
                info!(%entity, from = %old_key, to = %new_key, %correlation_id, "moved object");
                Ok(WriteOutcome::Updated { previous })
            }
            Err(source) => {
                warn!(%entity, key = %old_key, %correlation_id, error = %source, "failed to delete previous object, undoing write");
                let compensation = match self.store.delete(&new_key).await {
                    Ok(()) => Compensation::Deleted,
                    Err(e) => {
                        error!(%entity, key = %new_key, %correlation_id, error = %e, "compensating delete failed, entity has two objects");
                        Compensation::Failed(e.to_string())
                    }
                };
                Err(EngineError::PartialFailure {
                    entity,
                    old_key,
                    new_key,
                    source,
                    compensation,
                })
            }
        }
    }

    /// Delete the entity's object, returning the partition it lived under.
    pub async fn delete(&self, entity: &EntityId) -> EngineResult<PartitionValue> {
        let _guard = self.lock(entity).await;

        let partition = self
            .locator
            .locate(entity)
            .await?
            .ok_or_else(|| EngineError::NotFound(entity.clone()))?;
        let key = self.codec.encode(entity, &partition);
        self.store.delete(&key).await.map_err(|e| {
            error!(%entity, %key, error = %e, "failed to delete object");
            EngineError::from(e)
        })?;
        info!(%entity, %key, "deleted object");
        Ok(partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EntityFirstCodec, KeyFilter};
    use dstore_store::{Fault, InMemoryObjectStore, StoreCall, StoreOperation};

    fn setup() -> (Arc<InMemoryObjectStore>, VersionedWriter) {
        let store = Arc::new(InMemoryObjectStore::new());
        let codec: Arc<dyn KeyCodec> = Arc::new(EntityFirstCodec::new("content", ".json"));
        let locator = EntityLocator::new(store.clone(), codec.clone(), KeyFilter::default());
        let writer = VersionedWriter::new(store.clone(), codec, locator).with_locks(Arc::new(EntityLocks::new()));
        (store, writer)
    }

    fn id(value: &str) -> EntityId {
        EntityId::new(value).unwrap()
    }

    fn date(value: &str) -> PartitionValue {
        PartitionValue::new(value).unwrap()
    }

    #[tokio::test]
    async fn first_write_creates() {
        let (store, writer) = setup();
        let request = WriteRequest::new(id("a"), date("2020-01-01"), "v1")
            .with_content_type(Some("application/json"))
            .with_correlation_id(CorrelationId::from_optional(Some("tid_1")));

        let outcome = writer.write(request).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Created);
        assert_eq!(store.keys(), vec!["content/a/2020-01-01.json".to_string()]);
        assert_eq!(
            store.content_type("content/a/2020-01-01.json").as_deref(),
            Some("application/json")
        );
        assert_eq!(
            store
                .metadata("content/a/2020-01-01.json")
                .get(CorrelationId::METADATA_KEY)
                .map(String::as_str),
            Some("tid_1")
        );
    }

    #[tokio::test]
    async fn same_partition_overwrites_without_delete() {
        let (store, writer) = setup();
        writer.write(WriteRequest::new(id("a"), date("2020-01-01"), "v1")).await.unwrap();
        store.clear_calls();

        let outcome = writer.write(WriteRequest::new(id("a"), date("2020-01-01"), "v2")).await.unwrap();
        assert_eq!(outcome, WriteOutcome::UpdatedInPlace);
        assert!(store.deleted_keys().is_empty());
        assert_eq!(store.contents("content/a/2020-01-01.json").unwrap(), "v2");
    }

    #[tokio::test]
    async fn partition_change_moves_the_object() {
        let (store, writer) = setup();
        writer.write(WriteRequest::new(id("a"), date("2020-01-01"), "v1")).await.unwrap();
        store.clear_calls();

        let outcome = writer.write(WriteRequest::new(id("a"), date("2021-01-01"), "v2")).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Updated { previous: date("2020-01-01") });
        assert_eq!(store.keys(), vec!["content/a/2021-01-01.json".to_string()]);

        // Put strictly precedes the delete of the old key.
        let calls = store.calls();
        let put = calls
            .iter()
            .position(|c| matches!(c, StoreCall::Put { .. }))
            .unwrap();
        let delete = calls
            .iter()
            .position(|c| matches!(c, StoreCall::Delete { .. }))
            .unwrap();
        assert!(put < delete);
        assert_eq!(store.deleted_keys(), vec!["content/a/2020-01-01.json".to_string()]);
    }

    #[tokio::test]
    async fn move_to_unpartitioned_leaf() {
        let (store, writer) = setup();
        writer.write(WriteRequest::new(id("a"), date("2020-01-01"), "v1")).await.unwrap();
        writer.write(WriteRequest::new(id("a"), PartitionValue::none(), "v2")).await.unwrap();
        assert_eq!(store.keys(), vec!["content/a/_.json".to_string()]);
    }

    #[tokio::test]
    async fn failed_old_delete_is_compensated() {
        let (store, writer) = setup();
        writer.write(WriteRequest::new(id("a"), date("2020-01-01"), "v1")).await.unwrap();
        store.inject(Fault::on(StoreOperation::Delete).key("content/a/2020-01-01.json"));

        let err = writer
            .write(WriteRequest::new(id("a"), date("2021-01-01"), "v2"))
            .await
            .unwrap_err();
        match err {
            EngineError::PartialFailure { compensation, .. } => assert_eq!(compensation, Compensation::Deleted),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.keys(), vec!["content/a/2020-01-01.json".to_string()]);
        assert_eq!(store.contents("content/a/2020-01-01.json").unwrap(), "v1");
    }

    #[tokio::test]
    async fn failed_compensation_is_reported() {
        let (store, writer) = setup();
        writer.write(WriteRequest::new(id("a"), date("2020-01-01"), "v1")).await.unwrap();
        store.inject(Fault::on(StoreOperation::Delete));

        let err = writer
            .write(WriteRequest::new(id("a"), date("2021-01-01"), "v2"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::PartialFailure { compensation: Compensation::Failed(_), .. }
        ));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn failed_put_leaves_store_untouched() {
        let (store, writer) = setup();
        writer.write(WriteRequest::new(id("a"), date("2020-01-01"), "v1")).await.unwrap();
        store.inject(Fault::on(StoreOperation::Put));

        let err = writer
            .write(WriteRequest::new(id("a"), date("2021-01-01"), "v2"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
        assert_eq!(store.keys(), vec!["content/a/2020-01-01.json".to_string()]);
        assert!(store.deleted_keys().is_empty());
    }

    #[tokio::test]
    async fn failed_locate_issues_no_put() {
        let (store, writer) = setup();
        store.inject(Fault::on(StoreOperation::List));
        let err = writer
            .write(WriteRequest::new(id("a"), date("2020-01-01"), "v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_located_object() {
        let (store, writer) = setup();
        writer.write(WriteRequest::new(id("a"), date("2020-01-01"), "v1")).await.unwrap();
        let partition = writer.delete(&id("a")).await.unwrap();
        assert_eq!(partition, date("2020-01-01"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_of_missing_entity_is_not_found() {
        let (store, writer) = setup();
        let err = writer.delete(&id("a")).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert!(store.deleted_keys().is_empty());
    }

    #[tokio::test]
    async fn concurrent_writes_leave_one_object() {
        let (store, writer) = setup();
        let writer = Arc::new(writer);
        let mut tasks = tokio::task::JoinSet::new();
        for day in 1..=9 {
            let writer = writer.clone();
            tasks.spawn(async move {
                let partition = PartitionValue::new(format!("2020-01-0{day}")).unwrap();
                writer.write(WriteRequest::new(id("a"), partition, "v")).await.unwrap();
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn locks_are_released() {
        let locks = EntityLocks::new();
        {
            let _a = locks.acquire(&id("a")).await;
            let _b = locks.acquire(&id("b")).await;
            assert_eq!(locks.active(), 2);
        }
        assert_eq!(locks.active(), 0);
    }
}
