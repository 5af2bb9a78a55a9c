//! Streaming export of a whole collection.
//!
//! Bodies export runs three stages joined by bounded queues:
//!
//! ```text
//! lister --keys (3000)--> W fetch workers --bodies (~1.5W)--> sink --> pipe
//! ```
//!
//! The sink is the only writer of the pipe, so records never interleave. Ids
//! export skips the fetch stage and writes one `{"ID": ...}` line per key.
//!
//! Both modes hand back an [`ExportReader`] as soon as a one-key probe
//! listing succeeds. Dropping the reader, or cancelling the parent token,
//! stops every stage at its next queue operation.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::BytesMut;
use dstore_store::{ObjectStore, StoredObject};
use futures::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, warn};

use crate::error::EngineResult;
use crate::lister::BulkLister;

/// Tuning for [`BulkExporter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportConfig {
    /// Number of concurrent fetch workers.
    pub workers: usize,
    /// Capacity of the queue between the lister and the workers.
    pub key_queue_capacity: usize,
    /// Bytes buffered in the pipe before the sink waits for the reader.
    pub pipe_capacity: usize,
}

impl ExportConfig {
    pub const DEFAULT_WORKERS: usize = 10;

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    /// Capacity of the queue between the workers and the sink.
    pub fn body_queue_capacity(&self) -> usize {
        (self.worker_count() * 3).div_ceil(2)
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            workers: Self::DEFAULT_WORKERS,
            key_queue_capacity: 3000,
            pipe_capacity: 64 * 1024,
        }
    }
}

/// Readable end of an export.
///
/// Dropping it cancels the producers behind it.
#[derive(Debug)]
pub struct ExportReader {
    pipe: DuplexStream,
    _cancel: DropGuard,
}

impl ExportReader {
    fn new(pipe: DuplexStream, cancel: CancellationToken) -> Self {
        Self {
            pipe,
            _cancel: cancel.drop_guard(),
        }
    }

    /// Adapt into a stream of byte chunks, e.g. for an HTTP body.
    pub fn into_stream(self) -> ReaderStream<Self> {
        ReaderStream::new(self)
    }
}

impl AsyncRead for ExportReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_read(cx, buf)
    }
}

#[derive(Serialize)]
struct IdRecord<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
}

const RECORD_SEPARATOR: &[u8] = b"\n";

/// Streams every object, or every entity id, of a collection.
#[derive(Clone, Debug)]
pub struct BulkExporter {
    store: Arc<dyn ObjectStore>,
    lister: BulkLister,
    config: ExportConfig,
}

impl BulkExporter {
    pub fn new(store: Arc<dyn ObjectStore>, lister: BulkLister, config: ExportConfig) -> Self {
        Self { store, lister, config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Concatenated object bodies, one per line, in no particular order.
    ///
    /// Objects that fail to fetch are logged and skipped. A listing failure
    /// after the probe truncates the output.
    pub async fn export_all(&self, cancel: &CancellationToken) -> EngineResult<ExportReader> {
        self.lister.precheck().await?;

        let token = cancel.child_token();
        let (pipe, reader) = tokio::io::duplex(self.config.pipe_capacity);
        let (key_tx, key_rx) = async_channel::bounded(self.config.key_queue_capacity.max(1));
        let (body_tx, body_rx) = mpsc::channel(self.config.body_queue_capacity());

        tokio::spawn(feed_keys(self.lister.clone(), key_tx, token.clone()));

        let mut workers = JoinSet::new();
        for worker in 0..self.config.worker_count() {
            workers.spawn(fetch_objects(
                worker,
                self.store.clone(),
                key_rx.clone(),
                body_tx.clone(),
                token.clone(),
            ));
        }
        drop(key_rx);

        // The sink sees the end of the body queue once every worker is done
        // and this last sender goes away.
        tokio::spawn(async move {
            let mut fetched = 0usize;
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(n) => fetched += n,
                    Err(e) => error!(error = %e, "export worker panicked"),
                }
            }
            drop(body_tx);
            debug!(fetched, "export workers finished");
        });

        tokio::spawn(write_bodies(body_rx, pipe, token.clone()));
        Ok(ExportReader::new(reader, token))
    }

    /// One `{"ID": "<entity>"}` line per key. Keys whose first segment is
    /// not a valid entity id are skipped.
    pub async fn export_ids(&self, cancel: &CancellationToken) -> EngineResult<ExportReader> {
        self.lister.precheck().await?;

        let token = cancel.child_token();
        let (pipe, reader) = tokio::io::duplex(self.config.pipe_capacity);
        tokio::spawn(write_ids(self.lister.clone(), pipe, token.clone()));
        Ok(ExportReader::new(reader, token))
    }
}

async fn feed_keys(lister: BulkLister, keys: async_channel::Sender<String>, cancel: CancellationToken) {
    let mut listing = lister.keys();
    let mut sent = 0u64;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = listing.next() => next,
        };
        let key = match next {
            None => break,
            Some(Ok(key)) => key,
            Some(Err(e)) => {
                error!(error = %e, "listing failed during export, output is truncated");
                break;
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent_ok = keys.send(key) => {
                if sent_ok.is_err() {
                    break;
                }
            }
        }
        sent += 1;
    }
    debug!(keys = sent, "export listing finished");
}

async fn fetch_objects(
    worker: usize,
    store: Arc<dyn ObjectStore>,
    keys: async_channel::Receiver<String>,
    bodies: mpsc::Sender<(String, StoredObject)>,
    cancel: CancellationToken,
) -> usize {
    let mut fetched = 0;
    loop {
        let key = tokio::select! {
            _ = cancel.cancelled() => break,
            key = keys.recv() => match key {
                Ok(key) => key,
                Err(_) => break,
            },
        };
        let object = tokio::select! {
            _ = cancel.cancelled() => break,
            object = store.get(&key) => object,
        };
        match object {
            Ok(Some(object)) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = bodies.send((key, object)) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                fetched += 1;
            }
            Ok(None) => debug!(worker, %key, "object vanished before fetch"),
            Err(e) => warn!(worker, %key, error = %e, "failed to fetch object, skipping"),
        }
    }
    fetched
}

/// Write `data` unless the export is cancelled first. A write error means
/// the reader is gone, which cancels the whole export.
async fn write_to_pipe(pipe: &mut DuplexStream, data: &[u8], cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        written = pipe.write_all(data) => match written {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "export reader went away");
                cancel.cancel();
                false
            }
        },
    }
}

async fn write_bodies(
    mut bodies: mpsc::Receiver<(String, StoredObject)>,
    mut pipe: DuplexStream,
    cancel: CancellationToken,
) {
    let mut records = 0u64;
    'objects: loop {
        let (key, mut object) = tokio::select! {
            _ = cancel.cancelled() => break,
            next = bodies.recv() => match next {
                Some(item) => item,
                None => break,
            },
        };

        // The whole body is read before any of it reaches the pipe, so a
        // failed object leaves no trace in the output.
        let mut record = BytesMut::new();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break 'objects,
                chunk = object.body.next() => chunk,
            };
            match chunk {
                None => break,
                Some(Ok(bytes)) => record.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    warn!(%key, error = %e, read = record.len(), "object body failed mid-read, skipping");
                    continue 'objects;
                }
            }
        }
        record.extend_from_slice(RECORD_SEPARATOR);

        if !write_to_pipe(&mut pipe, &record, &cancel).await {
            break;
        }
        records += 1;
    }
    bodies.close();
    if let Err(e) = pipe.shutdown().await {
        debug!(error = %e, "export pipe already closed");
    }
    debug!(records, "export sink finished");
}

async fn write_ids(lister: BulkLister, mut pipe: DuplexStream, cancel: CancellationToken) {
    let codec = lister.codec().clone();
    let mut listing = lister.keys();
    let mut records = 0u64;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = listing.next() => next,
        };
        let key = match next {
            None => break,
            Some(Ok(key)) => key,
            Some(Err(e)) => {
                error!(error = %e, "listing failed during id export, output is truncated");
                break;
            }
        };
        let entity = match codec.entity_of(&key) {
            Ok(entity) => entity,
            Err(e) => {
                warn!(%key, error = %e, "skipping key without a valid entity id");
                continue;
            }
        };
        let mut line = match serde_json::to_vec(&IdRecord { id: entity.as_str() }) {
            Ok(line) => line,
            Err(e) => {
                error!(%key, error = %e, "failed to encode id record");
                break;
            }
        };
        line.extend_from_slice(RECORD_SEPARATOR);
        if !write_to_pipe(&mut pipe, &line, &cancel).await {
            break;
        }
        records += 1;
    }
    drop(listing);
    if let Err(e) = pipe.shutdown().await {
        debug!(error = %e, "export pipe already closed");
    }
    debug!(records, "id export finished");
}
