use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};

use crate::error::{StoreError, StoreOperation, StoreResult};
use crate::object::{ListPage, PutOptions, StoredObject};
use crate::traits::{ListStream, ObjectStore};

/// Default number of keys per listing page, matching S3.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Clone, Debug)]
struct MemoryObject {
    data: Bytes,
    content_type: Option<String>,
    metadata: BTreeMap<String, String>,
}

/// A store call recorded by [`InMemoryObjectStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    Put { key: String },
    Get { key: String },
    Delete { key: String },
    Head { key: String },
    /// One page fetch of a listing.
    ListPage {
        prefix: Option<String>,
        page_size: usize,
    },
}

/// A failure injected into [`InMemoryObjectStore`].
///
/// Without a key the fault matches every call of its operation. For
/// [`StoreOperation::List`] the key is compared with the listing prefix
/// (`""` for an unprefixed listing). [`StoreOperation::Read`] faults let the
/// get succeed and fail the body stream halfway.
#[derive(Clone, Debug)]
pub struct Fault {
    operation: StoreOperation,
    key: Option<String>,
    remaining: Option<usize>,
}

impl Fault {
    pub fn on(operation: StoreOperation) -> Self {
        Self {
            operation,
            key: None,
            remaining: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Fire only for the next `n` matching calls.
    pub fn times(mut self, n: usize) -> Self {
        self.remaining = Some(n);
        self
    }

    fn matches(&self, operation: StoreOperation, key: &str) -> bool {
        self.operation == operation
            && self.remaining != Some(0)
            && self.key.as_deref().map_or(true, |k| k == key)
    }
}

/// In-memory, `BTreeMap`-based object store.
///
/// Intended for tests. Keys are listed in lexicographic order like S3, pages
/// are cut at a configurable size, and every call is logged so tests can
/// assert what the code under test asked the store to do.
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, MemoryObject>>,
    page_size: usize,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<StoreCall>>,
}

impl InMemoryObjectStore {
    /// Create a new empty store with S3-sized pages.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create a new empty store that cuts listings into pages of `page_size`.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Seed an object directly, bypassing the call log and faults.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>, content_type: Option<&str>) {
        let object = MemoryObject {
            data: data.into(),
            content_type: content_type.map(str::to_string),
            metadata: BTreeMap::new(),
        };
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(key.into(), object);
    }

    /// Raw contents stored under `key`.
    pub fn contents(&self, key: &str) -> Option<Bytes> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(key).map(|obj| obj.data.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(key).and_then(|obj| obj.content_type.clone())
    }

    pub fn metadata(&self, key: &str) -> BTreeMap<String, String> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(key).map(|obj| obj.metadata.clone()).unwrap_or_default()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().expect("lock poisoned").keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Register a fault. Faults are matched in registration order.
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().expect("lock poisoned").push(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().expect("lock poisoned").clear();
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().expect("lock poisoned").clear();
    }

    /// Keys passed to `delete`, in call order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Delete { key } => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Prefixes of every listing page fetched, in call order.
    pub fn listed_prefixes(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::ListPage { prefix, .. } => Some(prefix),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().expect("lock poisoned").push(call);
    }

    fn take_fault(&self, operation: StoreOperation, key: &str) -> bool {
        let mut faults = self.faults.lock().expect("lock poisoned");
        match faults.iter_mut().find(|f| f.matches(operation, key)) {
            Some(fault) => {
                if let Some(n) = fault.remaining.as_mut() {
                    *n -= 1;
                }
                true
            }
            None => false,
        }
    }

    fn check_fault(&self, operation: StoreOperation, key: &str) -> StoreResult<()> {
        if self.take_fault(operation, key) {
            return Err(StoreError::backend(operation, key, "injected fault"));
        }
        Ok(())
    }

    /// Fetch one page of keys strictly after `after`. The flag tells whether
    /// more keys follow.
    fn fetch_page(
        &self,
        prefix: Option<&str>,
        after: Option<&str>,
        page_size: usize,
    ) -> StoreResult<(ListPage, bool)> {
        self.record(StoreCall::ListPage {
            prefix: prefix.map(str::to_string),
            page_size,
        });
        self.check_fault(StoreOperation::List, prefix.unwrap_or(""))?;

        let lower = match (after, prefix) {
            (Some(after), _) => Bound::Excluded(after),
            (None, Some(prefix)) => Bound::Included(prefix),
            (None, None) => Bound::Unbounded,
        };
        let map = self.objects.read().expect("lock poisoned");
        let mut keys: Vec<String> = map
            .range::<str, _>((lower, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| prefix.map_or(true, |p| key.starts_with(p)))
            .take(page_size + 1)
            .cloned()
            .collect();
        let more = keys.len() > page_size;
        keys.truncate(page_size);
        Ok((ListPage::new(keys), more))
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes, options: PutOptions) -> StoreResult<()> {
        self.record(StoreCall::Put { key: key.to_string() });
        self.check_fault(StoreOperation::Put, key)?;
        let object = MemoryObject {
            data: body,
            content_type: options.content_type,
            metadata: options.metadata,
        };
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), object);
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        self.record(StoreCall::Get { key: key.to_string() });
        self.check_fault(StoreOperation::Get, key)?;
        let found = self.objects.read().expect("lock poisoned").get(key).cloned();
        let Some(object) = found else {
            return Ok(None);
        };

        if self.take_fault(StoreOperation::Read, key) {
            let half = object.data.slice(..object.data.len() / 2);
            let chunks = vec![
                Ok(half),
                Err(StoreError::backend(StoreOperation::Read, key, "injected fault")),
            ];
            return Ok(Some(StoredObject {
                body: stream::iter(chunks).boxed(),
                content_type: object.content_type,
            }));
        }
        Ok(Some(StoredObject::from_bytes(object.data, object.content_type)))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.record(StoreCall::Delete { key: key.to_string() });
        self.check_fault(StoreOperation::Delete, key)?;
        self.objects.write().expect("lock poisoned").remove(key);
        Ok(())
    }

    async fn head_exists(&self, key: &str) -> StoreResult<bool> {
        self.record(StoreCall::Head { key: key.to_string() });
        self.check_fault(StoreOperation::Head, key)?;
        Ok(self.objects.read().expect("lock poisoned").contains_key(key))
    }

    fn list(&self, prefix: Option<&str>, page_size: Option<usize>) -> ListStream<'_> {
        let prefix = prefix.map(str::to_string);
        let page_size = page_size
            .map_or(self.page_size, |cap| cap.min(self.page_size))
            .max(1);

        // State: `None` once the last page went out, otherwise the cursor.
        let start: Option<Option<String>> = Some(None);
        stream::unfold(start, move |state| {
            let prefix = prefix.clone();
            async move {
                let Some(cursor) = state else {
                    return None;
                };
                match self.fetch_page(prefix.as_deref(), cursor.as_deref(), page_size) {
                    Ok((page, more)) => {
                        let next = if more { Some(page.keys.last().cloned()) } else { None };
                        Some((Ok(page), next))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
        .boxed()
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len())
            .field("page_size", &self.page_size)
            .finish()
    }
}
