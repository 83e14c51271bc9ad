use super::queue::{
    DeadLetterRetry, DrainReport, QueueError, QueueItem, QueueStatus, RetryPolicy, SyncQueue,
    WriteRequest,
};
use super::remote::{RemoteError, RemoteWriter};
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Applied remotely right away.
    Synced,
    /// Parked in the queue for a later drain.
    Queued(QueueItem),
    /// Rejected by the remote with no retries left.
    DeadLettered(QueueItem),
}

impl SubmitOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SubmitOutcome::Synced => "synced",
            SubmitOutcome::Queued(_) => "queued",
            SubmitOutcome::DeadLettered(_) => "dead_letter",
        }
    }

    pub fn item(&self) -> Option<&QueueItem> {
        match self {
            SubmitOutcome::Synced => None,
            SubmitOutcome::Queued(item) | SubmitOutcome::DeadLettered(item) => Some(item),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub pending: usize,
    pub dead_lettered: usize,
    pub last_report: Option<DrainReport>,
}

/// Owns the queue and the remote writer and decides when to drain.
///
/// Every drain goes through `&mut self`, so two drains can never overlap; a
/// trigger that arrives while one runs is handled by the event loop after it
/// finishes.
pub struct SyncEngine {
    queue: SyncQueue,
    writer: Box<dyn RemoteWriter>,
    policy: RetryPolicy,
    online: bool,
    last_report: Option<DrainReport>,
}

impl SyncEngine {
    pub fn new(queue: SyncQueue, writer: Box<dyn RemoteWriter>, policy: RetryPolicy) -> Self {
        Self {
            queue,
            writer,
            policy,
            online: false,
            last_report: None,
        }
    }

    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    /// Swaps the remote writer, e.g. after its settings changed.
    pub fn set_writer(&mut self, writer: Box<dyn RemoteWriter>) {
        self.writer = writer;
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_items(&self) -> &[QueueItem] {
        self.queue.items()
    }

    pub fn dead_letters(&self) -> &[QueueItem] {
        self.queue.dead_letters()
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            online: self.online,
            pending: self.queue.len(),
            dead_lettered: self.queue.dead_letters().len(),
            last_report: self.last_report,
        }
    }

    /// Writes directly when online with nothing older pending. An online
    /// submit with a backlog drains it first, so the queue keeps moving while
    /// connectivity holds. Otherwise, or when the direct write fails, the
    /// request joins the tail of the queue.
    pub fn submit(&mut self, request: WriteRequest) -> Result<SubmitOutcome, QueueError> {
        request.validate()?;
        if self.online && !self.queue.is_empty() {
            self.drain();
        }
        if !self.online || !self.queue.is_empty() {
            return Ok(SubmitOutcome::Queued(self.queue.enqueue(request)?));
        }

        let (attempts, last_error) = match self.writer.write(&request) {
            Ok(()) => {
                if let Some(row) = request.row_key() {
                    self.queue.supersede_dead_letters(&row, None);
                }
                return Ok(SubmitOutcome::Synced);
            }
            Err(RemoteError::Offline(msg)) => {
                info!(error = %msg, "remote unreachable, switching to offline mode");
                self.online = false;
                (0, msg)
            }
            Err(e @ RemoteError::Transient(_)) => (0, e.to_string()),
            Err(e @ RemoteError::Rejected { .. }) => (1, e.to_string()),
        };
        let item =
            self.queue
                .enqueue_after_failure(request, attempts, Some(last_error), self.policy)?;
        Ok(match item.status {
            QueueStatus::DeadLetter => SubmitOutcome::DeadLettered(item),
            QueueStatus::Pending => SubmitOutcome::Queued(item),
        })
    }

    /// Process-start signal: drain once if already connected.
    pub fn on_process_start(&mut self, online: bool) -> Option<DrainReport> {
        self.online = online;
        if online {
            Some(self.drain())
        } else {
            None
        }
    }

    /// Connectivity signal. Only an offline -> online edge drains.
    pub fn on_connectivity(&mut self, online: bool) -> Option<DrainReport> {
        let was_online = self.online;
        self.online = online;
        if online && !was_online {
            info!(pending = self.queue.len(), "connectivity restored");
            Some(self.drain())
        } else {
            None
        }
    }

    /// One pass over the queue. Never fails: per-item failures only show up in
    /// `remaining`, and a storage failure is logged.
    pub fn drain(&mut self) -> DrainReport {
        if self.queue.is_empty() {
            let report = DrainReport::default();
            self.last_report = Some(report);
            return report;
        }
        let report = match self.queue.drain(self.writer.as_mut(), self.policy) {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "failed to persist sync queue after drain");
                DrainReport {
                    remaining: self.queue.len(),
                    ..DrainReport::default()
                }
            }
        };
        if report.offline {
            self.online = false;
        }
        info!(
            succeeded = report.succeeded,
            remaining = report.remaining,
            dead_lettered = report.dead_lettered,
            offline = report.offline,
            "sync drain finished"
        );
        self.last_report = Some(report);
        report
    }

    pub fn retry_dead_letter(&mut self, id: &str) -> Result<DeadLetterRetry, QueueError> {
        self.queue.retry_dead_letter(id)
    }
}
