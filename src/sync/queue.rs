use super::remote::{RemoteError, RemoteWriter};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const QUEUE_KEY: &str = "pending_writes";
pub const DEAD_LETTER_KEY: &str = "dead_letters";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage failed: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("queue storage is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("upsert into {collection} needs a conflict key")]
    MissingConflictKey { collection: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Upsert,
}

/// One remote write, independent of whether it was ever queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    pub target_collection: String,
    pub payload: serde_json::Value,
    pub operation_kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_key: Option<String>,
}

impl WriteRequest {
    pub fn upsert(
        collection: impl Into<String>,
        payload: serde_json::Value,
        conflict_key: impl Into<String>,
    ) -> Self {
        Self {
            target_collection: collection.into(),
            payload,
            operation_kind: OperationKind::Upsert,
            conflict_key: Some(conflict_key.into()),
        }
    }

    #[cfg(test)]
    pub fn insert(collection: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            target_collection: collection.into(),
            payload,
            operation_kind: OperationKind::Insert,
            conflict_key: None,
        }
    }

    /// Identity of the remote row an upsert targets: the collection plus the
    /// payload's conflict-key values. Inserts have none.
    pub fn row_key(&self) -> Option<String> {
        if self.operation_kind != OperationKind::Upsert {
            return None;
        }
        let columns = self.conflict_key.as_deref()?;
        let mut key = self.target_collection.clone();
        for column in columns.split(',') {
            key.push('|');
            key.push_str(
                &self
                    .payload
                    .get(column.trim())
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        Some(key)
    }

    /// Replaying an upsert is only safe when it names the natural key.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.operation_kind == OperationKind::Upsert
            && self
                .conflict_key
                .as_deref()
                .map(|k| k.trim().is_empty())
                .unwrap_or(true)
        {
            return Err(QueueError::MissingConflictKey {
                collection: self.target_collection.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    DeadLetter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub request: WriteRequest,
    pub status: QueueStatus,
    /// Remote rejections so far. Offline and transient failures do not count.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Local durable key/value storage for serialized queues.
pub trait Persistence {
    fn load(&self, key: &str) -> Result<Option<String>, QueueError>;
    fn store(&mut self, key: &str, serialized: &str) -> Result<(), QueueError>;
}

/// One JSON file per key. Writes go to a temp file that is fsynced and
/// renamed over the target, so a crash leaves either the old or the new queue.
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Persistence for FilePersistence {
    fn load(&self, key: &str) -> Result<Option<String>, QueueError> {
        let path = self.path(key);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    fn store(&mut self, key: &str, serialized: &str) -> Result<(), QueueError> {
        std::fs::create_dir_all(&self.dir)?;
        let dst = self.path(key);
        let tmp = self.dir.join(format!("{}.json.writing", key));
        {
            let mut f = File::create(&tmp)?;
            f.write_all(serialized.as_bytes())?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, &dst)?;
        Ok(())
    }
}

/// Rejections allowed before an item is parked as a dead letter. Zero keeps
/// retrying forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_rejections: u32,
}

impl RetryPolicy {
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_rejections > 0 && attempts >= self.max_rejections
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_rejections: 5 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub succeeded: usize,
    pub remaining: usize,
    pub dead_lettered: usize,
    /// The remote reported itself unreachable part way through.
    pub offline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetterRetry {
    Requeued(QueueItem),
    /// A newer write for the same row is pending; the dead letter was dropped.
    Superseded(QueueItem),
    NotFound,
}

/// FIFO of pending remote writes, mirrored to durable storage on every
/// mutation.
pub struct SyncQueue {
    store: Box<dyn Persistence>,
    items: Vec<QueueItem>,
    dead: Vec<QueueItem>,
}

impl SyncQueue {
    pub fn open(store: Box<dyn Persistence>) -> Result<Self, QueueError> {
        let items = load_items(store.as_ref(), QUEUE_KEY)?;
        let dead = load_items(store.as_ref(), DEAD_LETTER_KEY)?;
        if !items.is_empty() || !dead.is_empty() {
            info!(
                pending = items.len(),
                dead_letters = dead.len(),
                "loaded sync queue"
            );
        }
        Ok(Self { store, items, dead })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn dead_letters(&self) -> &[QueueItem] {
        &self.dead
    }

    /// Appends a write and persists the queue before returning. Dead letters
    /// for the same row are superseded.
    pub fn enqueue(&mut self, request: WriteRequest) -> Result<QueueItem, QueueError> {
        self.enqueue_after_failure(request, 0, None, RetryPolicy::default())
    }

    /// Like `enqueue`, for a write whose direct attempt already failed. A
    /// write that already used up its rejections goes straight to the dead
    /// letters.
    pub fn enqueue_after_failure(
        &mut self,
        request: WriteRequest,
        attempts: u32,
        last_error: Option<String>,
        policy: RetryPolicy,
    ) -> Result<QueueItem, QueueError> {
        request.validate()?;
        let mut item = QueueItem {
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request,
            status: QueueStatus::Pending,
            attempts,
            last_error,
        };

        if policy.exhausted(attempts) {
            warn!(
                id = %item.id,
                attempts,
                "remote rejected write, moving to dead letters"
            );
            item.status = QueueStatus::DeadLetter;
            self.dead.push(item.clone());
            if let Err(e) = self.persist_dead() {
                self.dead.pop();
                return Err(e);
            }
        } else {
            self.items.push(item.clone());
            if let Err(e) = self.persist_items() {
                self.items.pop();
                return Err(e);
            }
            debug!(
                id = %item.id,
                collection = %item.request.target_collection,
                pending = self.items.len(),
                "enqueued remote write"
            );
        }
        if let Some(key) = item.request.row_key() {
            self.supersede_dead_letters(&key, Some(&item.id));
        }
        Ok(item)
    }

    /// Drops dead letters for a row that has a newer write, pending or
    /// applied. Best effort: a failed store is logged and retried with the
    /// next dead-letter change.
    pub fn supersede_dead_letters(&mut self, row_key: &str, keep_id: Option<&str>) {
        let before = self.dead.len();
        self.dead.retain(|d| {
            Some(d.id.as_str()) == keep_id || d.request.row_key().as_deref() != Some(row_key)
        });
        let dropped = before - self.dead.len();
        if dropped == 0 {
            return;
        }
        info!(dropped, "dead letters superseded by a newer write");
        if let Err(e) = self.persist_dead() {
            warn!(error = %e, "failed to store superseded dead letters");
        }
    }

    /// One pass over the queue in FIFO order, at most one attempt per item.
    /// Successes are dropped; failures keep their relative order. Once the
    /// remote reports itself offline the rest of the pass is skipped. The
    /// surviving queue is persisted once at the end.
    pub fn drain(
        &mut self,
        writer: &mut dyn RemoteWriter,
        policy: RetryPolicy,
    ) -> Result<DrainReport, QueueError> {
        let mut report = DrainReport::default();
        let mut remaining: Vec<QueueItem> = Vec::with_capacity(self.items.len());
        let mut parked: Vec<QueueItem> = Vec::new();
        // Rows touched by each item, in queue order. A parked item with a
        // later write for its row is stale.
        let rows: Vec<Option<String>> = self.items.iter().map(|i| i.request.row_key()).collect();
        let mut parked_at: Vec<usize> = Vec::new();

        for (index, mut item) in std::mem::take(&mut self.items).into_iter().enumerate() {
            if report.offline {
                remaining.push(item);
                continue;
            }
            match writer.write(&item.request) {
                Ok(()) => {
                    debug!(id = %item.id, "remote write applied");
                    report.succeeded += 1;
                }
                Err(RemoteError::Offline(msg)) => {
                    debug!(id = %item.id, error = %msg, "remote offline, stopping pass");
                    report.offline = true;
                    item.last_error = Some(msg);
                    remaining.push(item);
                }
                Err(e @ RemoteError::Transient(_)) => {
                    debug!(id = %item.id, error = %e, "transient remote failure");
                    item.last_error = Some(e.to_string());
                    remaining.push(item);
                }
                Err(e @ RemoteError::Rejected { .. }) => {
                    item.attempts += 1;
                    item.last_error = Some(e.to_string());
                    if policy.exhausted(item.attempts) {
                        warn!(
                            id = %item.id,
                            attempts = item.attempts,
                            error = %e,
                            "remote keeps rejecting write, moving to dead letters"
                        );
                        item.status = QueueStatus::DeadLetter;
                        parked.push(item);
                        parked_at.push(index);
                    } else {
                        debug!(id = %item.id, attempts = item.attempts, error = %e, "remote rejected write");
                        remaining.push(item);
                    }
                }
            }
        }

        report.remaining = remaining.len();
        self.items = remaining;

        let mut fresh: Vec<QueueItem> = Vec::with_capacity(parked.len());
        for (item, index) in parked.into_iter().zip(parked_at) {
            let superseded = match &rows[index] {
                Some(row) => rows[index + 1..].iter().any(|r| r.as_ref() == Some(row)),
                None => false,
            };
            if superseded {
                debug!(id = %item.id, "rejected write already superseded, dropping");
            } else {
                fresh.push(item);
            }
        }
        report.dead_lettered = fresh.len();
        if !fresh.is_empty() {
            for row in fresh.iter().filter_map(|i| i.request.row_key()) {
                self.dead
                    .retain(|d| d.request.row_key().as_deref() != Some(row.as_str()));
            }
            self.dead.extend(fresh);
            // Dead letters first: a crash in between duplicates, never loses.
            self.persist_dead()?;
        }
        self.persist_items()?;
        Ok(report)
    }

    /// Moves a dead letter back to the tail of the queue with a fresh count.
    /// A dead letter whose row has a pending newer write is dropped instead.
    pub fn retry_dead_letter(&mut self, id: &str) -> Result<DeadLetterRetry, QueueError> {
        let Some(pos) = self.dead.iter().position(|d| d.id == id) else {
            return Ok(DeadLetterRetry::NotFound);
        };
        let row = self.dead[pos].request.row_key();
        let stale = row.is_some() && self.items.iter().any(|i| i.request.row_key() == row);
        let mut item = self.dead.remove(pos);
        if stale {
            self.persist_dead()?;
            return Ok(DeadLetterRetry::Superseded(item));
        }
        item.status = QueueStatus::Pending;
        item.attempts = 0;
        self.items.push(item.clone());
        // Queue first: a crash in between duplicates, never loses.
        self.persist_items()?;
        self.persist_dead()?;
        Ok(DeadLetterRetry::Requeued(item))
    }

    fn persist_items(&mut self) -> Result<(), QueueError> {
        let text = serde_json::to_string(&self.items)?;
        self.store.store(QUEUE_KEY, &text)
    }

    fn persist_dead(&mut self) -> Result<(), QueueError> {
        let text = serde_json::to_string(&self.dead)?;
        self.store.store(DEAD_LETTER_KEY, &text)
    }
}

fn load_items(store: &dyn Persistence, key: &str) -> Result<Vec<QueueItem>, QueueError> {
    match store.load(key)? {
        Some(text) if !text.trim().is_empty() => Ok(serde_json::from_str(&text)?),
        _ => Ok(Vec::new()),
    }
}
