use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use dstore_engine::{Collection, ExportReader, WriteRequest};
use dstore_types::{CorrelationId, EntityId, PartitionValue};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ServerError, ServerResult};

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// State of one mounted collection.
#[derive(Clone, Debug)]
pub struct CollectionState {
    pub collection: Arc<Collection>,
    /// Parent of every export token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Default, Deserialize)]
pub struct WriteParams {
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadParams {
    #[serde(rename = "publishedDate")]
    pub published_date: Option<String>,
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub async fn put_item(
    State(state): State<CollectionState>,
    Path(id): Path<String>,
    Query(params): Query<WriteParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Response> {
    let collection = &state.collection;
    let entity = EntityId::new(id)?;
    let partition = if collection.is_partitioned() {
        let date = non_blank(params.date).ok_or(ServerError::MissingParam("date"))?;
        PartitionValue::new(date)?
    } else {
        PartitionValue::none()
    };

    let request = WriteRequest::new(entity, partition, body)
        .with_content_type(header(&headers, CONTENT_TYPE.as_str()))
        .with_correlation_id(CorrelationId::from_optional(header(&headers, REQUEST_ID_HEADER)));
    let outcome = collection.write(request).await?;

    let (status, message) = if outcome.is_created() {
        (StatusCode::CREATED, "CREATED")
    } else {
        (StatusCode::OK, "UPDATED")
    };
    Ok((status, Json(json!({ "message": message }))).into_response())
}

pub async fn get_item(
    State(state): State<CollectionState>,
    Path(id): Path<String>,
    Query(params): Query<ReadParams>,
) -> ServerResult<Response> {
    let collection = &state.collection;
    let entity = EntityId::new(id)?;
    let partition = match non_blank(params.published_date) {
        Some(date) if collection.is_partitioned() => Some(PartitionValue::new(date)?),
        _ => None,
    };

    let object = collection
        .get(&entity, partition)
        .await?
        .ok_or(ServerError::NotFound)?;
    let content_type = object.content_type.clone();
    let body = object.into_bytes().await.map_err(ServerError::BodyRead)?;

    let mut response = (StatusCode::OK, body).into_response();
    if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    Ok(response)
}

pub async fn delete_item(State(state): State<CollectionState>, Path(id): Path<String>) -> ServerResult<StatusCode> {
    let entity = EntityId::new(id)?;
    state.collection.delete(&entity).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn count(State(state): State<CollectionState>) -> ServerResult<Response> {
    let n = state.collection.count().await?;
    info!(collection = state.collection.name(), count = n, "counted collection");
    Ok(([(CONTENT_TYPE, "application/json")], n.to_string()).into_response())
}

fn stream_response(reader: ExportReader) -> Response {
    ([(CONTENT_TYPE, OCTET_STREAM)], Body::from_stream(reader.into_stream())).into_response()
}

pub async fn ids(State(state): State<CollectionState>) -> ServerResult<Response> {
    let reader = state.collection.export_ids(&state.shutdown).await?;
    debug!(collection = state.collection.name(), "streaming ids");
    Ok(stream_response(reader))
}

pub async fn export(State(state): State<CollectionState>) -> ServerResult<Response> {
    let reader = state.collection.export_all(&state.shutdown).await?;
    debug!(collection = state.collection.name(), "streaming export");
    Ok(stream_response(reader))
}
