use std::sync::Arc;

use dstore_store::{ObjectStore, StoredObject};
use dstore_types::{EntityId, PartitionValue, RESERVED_MARKER};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::codec::{verify_entity_scoping, EntityFirstCodec, KeyCodec, KeyFilter, DEFAULT_SUFFIX};
use crate::error::{EngineError, EngineResult};
use crate::exporter::{BulkExporter, ExportConfig, ExportReader};
use crate::lister::BulkLister;
use crate::locator::EntityLocator;
use crate::writer::{EntityLocks, VersionedWriter, WriteOutcome, WriteRequest};

/// Settings for one collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    /// URL path segment the collection is served under. Defaults to `name`.
    #[serde(default)]
    pub path: Option<String>,
    /// Bucket prefix holding the collection's objects.
    pub prefix: String,
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Whether objects carry a partition value (a publication date).
    #[serde(default)]
    pub partitioned: bool,
    #[serde(default = "default_marker")]
    pub reserved_marker: String,
    /// Serialise writes of the same entity within this process.
    #[serde(default = "default_true")]
    pub serialize_writes: bool,
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

fn default_marker() -> String {
    RESERVED_MARKER.to_string()
}

fn default_true() -> bool {
    true
}

impl CollectionConfig {
    pub fn new(name: &str, prefix: &str, partitioned: bool) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            prefix: prefix.to_string(),
            suffix: default_suffix(),
            partitioned,
            reserved_marker: default_marker(),
            serialize_writes: true,
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn route(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }
}

/// One bucket prefix and the components operating on it.
#[derive(Clone, Debug)]
pub struct Collection {
    config: CollectionConfig,
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn KeyCodec>,
    locator: EntityLocator,
    writer: VersionedWriter,
    lister: BulkLister,
    exporter: BulkExporter,
}

impl Collection {
    pub fn new(config: CollectionConfig, store: Arc<dyn ObjectStore>, export: ExportConfig) -> EngineResult<Self> {
        let codec = Arc::new(EntityFirstCodec::new(&config.prefix, &config.suffix));
        Self::with_codec(config, store, codec, export)
    }

    /// Build with a custom key scheme. The codec is probed for entity scoping
    /// first and rejected if it fails.
    pub fn with_codec(
        config: CollectionConfig,
        store: Arc<dyn ObjectStore>,
        codec: Arc<dyn KeyCodec>,
        export: ExportConfig,
    ) -> EngineResult<Self> {
        verify_entity_scoping(codec.as_ref())?;

        let filter = KeyFilter::new(config.reserved_marker.clone());
        let locator = EntityLocator::new(store.clone(), codec.clone(), filter.clone());
        let mut writer = VersionedWriter::new(store.clone(), codec.clone(), locator.clone());
        if config.serialize_writes {
            writer = writer.with_locks(Arc::new(EntityLocks::new()));
        }
        let lister = BulkLister::new(store.clone(), codec.clone(), filter);
        let exporter = BulkExporter::new(store.clone(), lister.clone(), export);
        Ok(Self {
            config,
            store,
            codec,
            locator,
            writer,
            lister,
            exporter,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn is_partitioned(&self) -> bool {
        self.config.partitioned
    }

    pub fn codec(&self) -> &Arc<dyn KeyCodec> {
        &self.codec
    }

    fn check_entity(&self, entity: &EntityId) -> EngineResult<()> {
        let marker = self.config.reserved_marker.as_str();
        if !marker.is_empty() && entity.as_str().starts_with(marker) {
            return Err(EngineError::ReservedEntity(entity.clone()));
        }
        Ok(())
    }

    pub async fn write(&self, request: WriteRequest) -> EngineResult<WriteOutcome> {
        self.check_entity(&request.entity)?;
        match (self.config.partitioned, request.partition.is_empty()) {
            (true, true) => Err(EngineError::MissingPartition {
                collection: self.config.name.clone(),
            }),
            (false, false) => Err(EngineError::UnexpectedPartition {
                collection: self.config.name.clone(),
            }),
            _ => self.writer.write(request).await,
        }
    }

    pub async fn delete(&self, entity: &EntityId) -> EngineResult<PartitionValue> {
        self.check_entity(entity)?;
        self.writer.delete(entity).await
    }

    /// Open the entity's object.
    ///
    /// Without a partition, a partitioned collection locates the object
    /// first; an unpartitioned one reads its single key directly.
    pub async fn get(&self, entity: &EntityId, partition: Option<PartitionValue>) -> EngineResult<Option<StoredObject>> {
        self.check_entity(entity)?;
        let partition = match partition {
            Some(partition) => partition,
            None if self.config.partitioned => match self.locator.locate(entity).await? {
                Some(partition) => partition,
                None => return Ok(None),
            },
            None => PartitionValue::none(),
        };
        let key = self.codec.encode(entity, &partition);
        Ok(self.store.get(&key).await?)
    }

    pub async fn locate(&self, entity: &EntityId) -> EngineResult<Option<PartitionValue>> {
        self.locator.locate(entity).await
    }

    pub async fn count(&self) -> EngineResult<u64> {
        self.lister.count().await
    }

    pub async fn export_all(&self, cancel: &CancellationToken) -> EngineResult<ExportReader> {
        self.exporter.export_all(cancel).await
    }

    pub async fn export_ids(&self, cancel: &CancellationToken) -> EngineResult<ExportReader> {
        self.exporter.export_ids(cancel).await
    }
}
