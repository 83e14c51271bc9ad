use super::queue::{OperationKind, WriteRequest};
use crate::config::RemoteEnv;
use anyhow::Context;
use postgrest::Postgrest;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// The write could not even be attempted.
    #[error("remote unreachable: {0}")]
    Offline(String),

    /// Attempted and failed in a way worth retrying (timeout, 5xx, throttling).
    #[error("remote write failed: {0}")]
    Transient(String),

    /// Attempted and refused by the service.
    #[error("remote rejected write ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Write capability of the remote data service.
pub trait RemoteWriter {
    fn write(&mut self, request: &WriteRequest) -> Result<(), RemoteError>;
}

/// Stand-in used when no credentials are configured: every write is treated
/// as a connectivity failure so it waits in the queue.
pub struct UnconfiguredRemote;

impl RemoteWriter for UnconfiguredRemote {
    fn write(&mut self, _request: &WriteRequest) -> Result<(), RemoteError> {
        Err(RemoteError::Offline(
            "remote data service is not configured".to_string(),
        ))
    }
}

/// Builds the writer for the credentials found in the environment, falling
/// back to `UnconfiguredRemote` when there are none.
pub fn writer_from_env(timeout: Duration) -> anyhow::Result<Box<dyn RemoteWriter>> {
    match RemoteEnv::from_env() {
        Some(env) => Ok(Box::new(PostgrestWriter::new(&env, timeout)?)),
        None => {
            warn!("SUPABASE_URL/SUPABASE_ANON_KEY not set; grades stay queued locally");
            Ok(Box::new(UnconfiguredRemote))
        }
    }
}

/// PostgREST-backed writer. Calls are driven to completion on a private
/// current-thread runtime, so the caller sees a plain blocking write.
pub struct PostgrestWriter {
    client: Postgrest,
    runtime: Runtime,
    timeout: Duration,
}

impl PostgrestWriter {
    pub fn new(env: &RemoteEnv, timeout: Duration) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to create runtime for remote writes")?;
        let client = Postgrest::new(env.rest_endpoint.clone())
            .insert_header("apikey", env.api_key.clone())
            .insert_header("Authorization", format!("Bearer {}", env.api_key));
        Ok(Self {
            client,
            runtime,
            timeout,
        })
    }
}

impl RemoteWriter for PostgrestWriter {
    fn write(&mut self, request: &WriteRequest) -> Result<(), RemoteError> {
        let body = serde_json::to_string(&request.payload).map_err(|e| RemoteError::Rejected {
            status: 0,
            message: format!("payload not serializable: {}", e),
        })?;
        let table = self.client.from(&request.target_collection);
        let builder = match request.operation_kind {
            OperationKind::Insert => table.insert(body),
            OperationKind::Upsert => match request.conflict_key.as_deref() {
                Some(key) => table.upsert(body).on_conflict(key),
                None => table.upsert(body),
            },
        };

        let timeout = self.timeout;
        let response = match self
            .runtime
            .block_on(async move { tokio::time::timeout(timeout, builder.execute()).await })
        {
            Err(_) => {
                return Err(RemoteError::Transient(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                )))
            }
            Ok(Err(e)) if e.is_connect() => return Err(RemoteError::Offline(e.to_string())),
            Ok(Err(e)) => return Err(RemoteError::Transient(e.to_string())),
            Ok(Ok(r)) => r,
        };

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(());
        }
        // An insert that collides was applied by an earlier attempt.
        if status == 409 && request.operation_kind == OperationKind::Insert {
            return Ok(());
        }
        let message = self.runtime.block_on(response.text()).unwrap_or_default();
        Err(classify_status(status, message))
    }
}

pub fn classify_status(status: u16, message: String) -> RemoteError {
    match status {
        408 | 425 | 429 | 500..=599 => RemoteError::Transient(format!("HTTP {}: {}", status, message)),
        _ => RemoteError::Rejected { status, message },
    }
}
