//! Queue consumer adapter.
//!
//! Publishing events arrive as a set of headers plus a JSON body carrying at
//! least the item's `uuid`. Each message becomes one write against a
//! collection; the raw body is stored as-is.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use dstore_types::{CorrelationId, EntityId, PartitionValue};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::collection::Collection;
use crate::writer::{WriteOutcome, WriteRequest};

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const MESSAGE_ID_HEADER: &str = "Message-Id";
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// One message taken off the queue.
#[derive(Clone, Debug, Default)]
pub struct QueueMessage {
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl QueueMessage {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Header lookup, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default, rename = "publishedDate")]
    published_date: Option<String>,
}

/// What happened to a message.
#[derive(Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Written(WriteOutcome),
    /// The message could not be turned into a write and was dropped.
    Rejected(String),
    /// The write was attempted and failed.
    Failed(String),
}

/// Turns queue messages into collection writes.
#[derive(Clone, Debug)]
pub struct IngestProcessor {
    collection: Arc<Collection>,
}

impl IngestProcessor {
    pub fn new(collection: Arc<Collection>) -> Self {
        Self { collection }
    }

    pub async fn process(&self, message: &QueueMessage) -> IngestOutcome {
        let correlation_id = CorrelationId::from_optional(message.header(REQUEST_ID_HEADER));
        let request = match self.build_request(message, &correlation_id) {
            Ok(request) => request,
            Err(reason) => {
                warn!(%correlation_id, collection = self.collection.name(), %reason, "dropping message");
                return IngestOutcome::Rejected(reason);
            }
        };

        let entity = request.entity.clone();
        match self.collection.write(request).await {
            Ok(outcome) => {
                info!(%correlation_id, %entity, collection = self.collection.name(), ?outcome, "ingested message");
                IngestOutcome::Written(outcome)
            }
            Err(e) => {
                error!(%correlation_id, %entity, collection = self.collection.name(), error = %e, "failed to ingest message");
                IngestOutcome::Failed(e.to_string())
            }
        }
    }

    fn build_request(&self, message: &QueueMessage, correlation_id: &CorrelationId) -> Result<WriteRequest, String> {
        let envelope: Envelope =
            serde_json::from_slice(&message.body).map_err(|e| format!("body is not a JSON object: {e}"))?;

        let uuid = envelope
            .uuid
            .filter(|uuid| !uuid.trim().is_empty())
            .or_else(|| message.header(MESSAGE_ID_HEADER).map(str::to_string))
            .ok_or_else(|| "message carries no uuid".to_string())?;
        let entity = EntityId::new(uuid).map_err(|e| e.to_string())?;

        let partition = if self.collection.is_partitioned() {
            let date = envelope
                .published_date
                .as_deref()
                .map(published_day)
                .unwrap_or_default();
            PartitionValue::new(date).map_err(|e| e.to_string())?
        } else {
            PartitionValue::none()
        };

        Ok(WriteRequest::new(entity, partition, message.body.clone())
            .with_content_type(message.header(CONTENT_TYPE_HEADER))
            .with_correlation_id(correlation_id.clone()))
    }
}

/// Calendar day of an RFC 3339 timestamp, or the value itself when it has no
/// time part.
fn published_day(published: &str) -> String {
    published
        .split_once('T')
        .map_or(published, |(day, _)| day)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionConfig;
    use crate::exporter::ExportConfig;
    use dstore_store::InMemoryObjectStore;

    fn setup(partitioned: bool) -> (Arc<InMemoryObjectStore>, IngestProcessor) {
        let store = Arc::new(InMemoryObjectStore::new());
        let config = CollectionConfig::new("content", "content", partitioned);
        let collection = Collection::new(config, store.clone(), ExportConfig::default()).unwrap();
        (store, IngestProcessor::new(Arc::new(collection)))
    }

    #[tokio::test]
    async fn writes_under_published_day() {
        let (store, processor) = setup(true);
        let message = QueueMessage::new(r#"{"uuid":"abc","publishedDate":"2020-03-04T10:00:00.000Z"}"#)
            .with_header("X-Request-Id", "tid_42")
            .with_header("Content-Type", "application/json");

        assert_eq!(processor.process(&message).await, IngestOutcome::Written(WriteOutcome::Created));
        assert_eq!(store.keys(), vec!["content/abc/2020-03-04.json".to_string()]);
        assert_eq!(
            store.content_type("content/abc/2020-03-04.json").as_deref(),
            Some("application/json")
        );
        assert_eq!(
            store
                .metadata("content/abc/2020-03-04.json")
                .get(CorrelationId::METADATA_KEY)
                .map(String::as_str),
            Some("tid_42")
        );
    }

    #[tokio::test]
    async fn falls_back_to_message_id_header() {
        let (store, processor) = setup(false);
        let message = QueueMessage::new("{}").with_header("message-id", "xyz");
        assert!(matches!(processor.process(&message).await, IngestOutcome::Written(_)));
        assert_eq!(store.keys(), vec!["content/xyz/_.json".to_string()]);
    }

    #[tokio::test]
    async fn invalid_json_is_dropped() {
        let (store, processor) = setup(true);
        let outcome = processor.process(&QueueMessage::new("not json")).await;
        assert!(matches!(outcome, IngestOutcome::Rejected(_)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_uuid_is_dropped() {
        let (_store, processor) = setup(false);
        let outcome = processor.process(&QueueMessage::new(r#"{"uuid":""}"#)).await;
        assert!(matches!(outcome, IngestOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn partitioned_message_without_date_fails() {
        let (store, processor) = setup(true);
        let outcome = processor.process(&QueueMessage::new(r#"{"uuid":"abc"}"#)).await;
        assert!(matches!(outcome, IngestOutcome::Failed(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn published_day_strips_time() {
        assert_eq!(published_day("2020-03-04T10:00:00Z"), "2020-03-04");
        assert_eq!(published_day("2020-03-04"), "2020-03-04");
    }
}
