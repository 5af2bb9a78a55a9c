use std::collections::BTreeMap;
use std::fmt;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::{StoreError, StoreResult};

/// Readable body of an object. Chunks are fetched lazily from the backend.
pub type ObjectBody = BoxStream<'static, StoreResult<Bytes>>;

/// An object opened by [`crate::ObjectStore::get`].
pub struct StoredObject {
    pub body: ObjectBody,
    pub content_type: Option<String>,
}

impl StoredObject {
    /// Wrap an in-memory buffer as a single-chunk body.
    pub fn from_bytes(data: Bytes, content_type: Option<String>) -> Self {
        Self {
            body: stream::once(async move { Ok::<_, StoreError>(data) }).boxed(),
            content_type,
        }
    }

    /// Drain the body into one buffer.
    pub async fn into_bytes(mut self) -> StoreResult<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredObject")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Optional attributes sent with a put.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the content type. Blank values are treated as absent.
    pub fn content_type(mut self, content_type: Option<&str>) -> Self {
        self.content_type = content_type
            .filter(|ct| !ct.trim().is_empty())
            .map(str::to_string);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One page of a listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
}

impl ListPage {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
