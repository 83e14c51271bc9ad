use crate::config;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::sync::{writer_from_env, FilePersistence, RetryPolicy, SyncEngine, SyncQueue};
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const SYNC_DIR: &str = "sync";

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "online": state.sync.as_ref().map(|s| s.is_online()),
        }),
    )
}

fn open_sync_engine(workspace: &Path, conn: &Connection) -> anyhow::Result<SyncEngine> {
    let settings = config::sync_settings(conn)?;
    let queue = SyncQueue::open(Box::new(FilePersistence::new(workspace.join(SYNC_DIR))))?;
    let writer = writer_from_env(Duration::from_secs(settings.request_timeout_secs))?;
    Ok(SyncEngine::new(
        queue,
        writer,
        RetryPolicy {
            max_rejections: settings.max_rejections,
        },
    ))
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let online = req
        .params
        .get("online")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    let mut engine = match open_sync_engine(&path, &conn) {
        Ok(engine) => engine,
        Err(e) => return err(&req.id, "sync_open_failed", format!("{e:#}"), None),
    };

    info!(
        workspace = %path.display(),
        pending = engine.pending_count(),
        online,
        "workspace opened"
    );
    let drained = engine.on_process_start(online);
    let status = engine.status();

    state.workspace = Some(path.clone());
    state.db = Some(conn);
    state.sync = Some(engine);
    ok(
        &req.id,
        json!({
            "workspacePath": path.to_string_lossy(),
            "sync": status,
            "drained": drained,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
