use std::path::Path as FsPath;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{Attribute, Attributes, PutPayload};
use tracing::debug;

use crate::error::{StoreError, StoreOperation, StoreResult};
use crate::memory::DEFAULT_PAGE_SIZE;
use crate::object::{ListPage, PutOptions, StoredObject};
use crate::traits::{ListStream, ObjectStore};

/// [`ObjectStore`] backed by the `object_store` crate.
///
/// The backend's listing stream is cut into pages of `page_size` keys so the
/// rest of the workspace sees the same paginated shape for every backend.
#[derive(Debug, Clone)]
pub struct LiveObjectStore {
    inner: Arc<dyn object_store::ObjectStore>,
    page_size: usize,
    attributes: bool,
}

impl LiveObjectStore {
    /// Wrap an already-built backend.
    pub fn new(inner: Arc<dyn object_store::ObjectStore>) -> Self {
        Self {
            inner,
            page_size: DEFAULT_PAGE_SIZE,
            attributes: true,
        }
    }

    /// Connect to an S3 bucket. Credentials come from the environment.
    pub fn s3(bucket: &str, region: &str, endpoint: Option<&str>) -> StoreResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(region);
        if let Some(endpoint) = endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        let s3 = builder
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;
        debug!(bucket, region, "connected S3 backend");
        Ok(Self::new(Arc::new(s3)))
    }

    /// Store objects as files under `root`, creating it if needed.
    ///
    /// The local filesystem cannot persist object attributes, so content
    /// types and metadata are dropped on this backend.
    pub fn local(root: &FsPath) -> StoreResult<Self> {
        std::fs::create_dir_all(root)?;
        let fs = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| StoreError::Config(e.to_string()))?;
        Ok(Self {
            attributes: false,
            ..Self::new(Arc::new(fs))
        })
    }

    /// Process-local backend; contents vanish with the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn path(key: &str) -> StoreResult<Path> {
        Path::parse(key).map_err(|e| StoreError::InvalidKey {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

fn is_not_found(err: &object_store::Error) -> bool {
    matches!(err, object_store::Error::NotFound { .. })
}

#[async_trait]
impl ObjectStore for LiveObjectStore {
    async fn put(&self, key: &str, body: Bytes, options: PutOptions) -> StoreResult<()> {
        let path = Self::path(key)?;
        let mut attributes = Attributes::new();
        if self.attributes {
            if let Some(content_type) = options.content_type {
                attributes.insert(Attribute::ContentType, content_type.into());
            }
            for (name, value) in options.metadata {
                attributes.insert(Attribute::Metadata(name.into()), value.into());
            }
        }
        let opts = object_store::PutOptions {
            attributes,
            ..Default::default()
        };
        self.inner
            .put_opts(&path, PutPayload::from(body), opts)
            .await
            .map_err(|e| StoreError::backend(StoreOperation::Put, key, e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        let path = Self::path(key)?;
        let result = match self.inner.get(&path).await {
            Ok(result) => result,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(StoreError::backend(StoreOperation::Get, key, e)),
        };
        let content_type = result.attributes.get(&Attribute::ContentType).map(|value| {
            let value: &str = value.as_ref();
            value.to_string()
        });
        let owned_key = key.to_string();
        let body = result
            .into_stream()
            .map_err(move |e| StoreError::backend(StoreOperation::Read, owned_key.clone(), e))
            .boxed();
        Ok(Some(StoredObject { body, content_type }))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = Self::path(key)?;
        match self.inner.delete(&path).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(StoreError::backend(StoreOperation::Delete, key, e)),
        }
    }

    async fn head_exists(&self, key: &str) -> StoreResult<bool> {
        let path = Self::path(key)?;
        match self.inner.head(&path).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(StoreError::backend(StoreOperation::Head, key, e)),
        }
    }

    /// Pages are cut from the backend's own listing stream, so `page_size`
    /// bounds what callers see per page but not the size of the underlying
    /// requests: S3 still returns up to 1000 keys per round trip even for a
    /// one-key probe. Dropping the stream stops further round trips.
    fn list(&self, prefix: Option<&str>, page_size: Option<usize>) -> ListStream<'_> {
        let page_size = page_size
            .map_or(self.page_size, |cap| cap.min(self.page_size))
            .max(1);
        let prefix_key = prefix.unwrap_or_default().to_string();
        // Backend prefixes match whole segments, so the trailing separator goes.
        let prefix_path = prefix.map(|p| Path::from(p.trim_end_matches('/')));

        self.inner
            .list(prefix_path.as_ref())
            .map_ok(|meta| meta.location.to_string())
            .map_err(move |e| StoreError::backend(StoreOperation::List, prefix_key.clone(), e))
            .chunks(page_size)
            .map(|chunk| chunk.into_iter().collect::<StoreResult<Vec<_>>>().map(ListPage::new))
            .boxed()
    }
}
