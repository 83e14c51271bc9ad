use super::queue::{OperationKind, Persistence, QueueError, WriteRequest};
use super::remote::{RemoteError, RemoteWriter};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

/// Shared in-memory store; clones see the same entries.
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    entries: Rc<RefCell<HashMap<String, String>>>,
    failing: Rc<Cell<bool>>,
}

impl MemoryPersistence {
    /// Makes every subsequent `store` fail like a full disk.
    pub fn fail_writes(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.borrow().clone()
    }

    pub fn from_snapshot(entries: HashMap<String, String>) -> Self {
        Self {
            entries: Rc::new(RefCell::new(entries)),
            failing: Rc::default(),
        }
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self, key: &str) -> Result<Option<String>, QueueError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn store(&mut self, key: &str, serialized: &str) -> Result<(), QueueError> {
        if self.failing.get() {
            return Err(QueueError::Persistence(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), serialized.to_string());
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scripted {
    Ok,
    Offline,
    Transient,
    Reject,
}

/// Remote table double with upsert-by-conflict-key semantics. Scripted
/// outcomes are consumed one per attempt, then `fallback` applies.
#[derive(Clone)]
pub struct MemoryRemote {
    rows: Rc<RefCell<BTreeMap<String, serde_json::Value>>>,
    script: Rc<RefCell<VecDeque<Scripted>>>,
    fallback: Scripted,
    attempts: Rc<Cell<usize>>,
    inserts: Rc<Cell<usize>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::always(Scripted::Ok)
    }
}

impl MemoryRemote {
    pub fn always(outcome: Scripted) -> Self {
        Self {
            rows: Rc::default(),
            script: Rc::default(),
            fallback: outcome,
            attempts: Rc::default(),
            inserts: Rc::default(),
        }
    }

    pub fn scripted<I: IntoIterator<Item = Scripted>>(outcomes: I) -> Self {
        let remote = Self::default();
        remote.script.borrow_mut().extend(outcomes);
        remote
    }

    pub fn push(&self, outcome: Scripted) {
        self.script.borrow_mut().push_back(outcome);
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.get()
    }

    pub fn row_count(&self) -> usize {
        self.rows.borrow().len()
    }

    pub fn row(&self, key: &str) -> Option<serde_json::Value> {
        self.rows.borrow().get(key).cloned()
    }

    fn row_key(&self, request: &WriteRequest) -> String {
        match (request.operation_kind, request.conflict_key.as_deref()) {
            (OperationKind::Upsert, Some(columns)) => columns
                .split(',')
                .map(|c| {
                    request
                        .payload
                        .get(c.trim())
                        .map(|v| v.to_string())
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>()
                .join("|"),
            _ => match request.payload.get("id").and_then(|v| v.as_str()) {
                Some(id) => id.to_string(),
                None => {
                    self.inserts.set(self.inserts.get() + 1);
                    format!("insert#{}", self.inserts.get())
                }
            },
        }
    }
}

impl RemoteWriter for MemoryRemote {
    fn write(&mut self, request: &WriteRequest) -> Result<(), RemoteError> {
        self.attempts.set(self.attempts.get() + 1);
        let outcome = self.script.borrow_mut().pop_front().unwrap_or(self.fallback);
        match outcome {
            Scripted::Ok => {
                let key = self.row_key(request);
                self.rows.borrow_mut().insert(key, request.payload.clone());
                Ok(())
            }
            Scripted::Offline => Err(RemoteError::Offline("network down".into())),
            Scripted::Transient => Err(RemoteError::Transient("HTTP 503".into())),
            Scripted::Reject => Err(RemoteError::Rejected {
                status: 400,
                message: "check constraint violated".into(),
            }),
        }
    }
}
