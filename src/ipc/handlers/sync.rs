use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::sync::DeadLetterRetry;
use serde_json::json;

fn handle_sync_pending_count(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(engine) = state.sync.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    ok(&req.id, json!({ "pendingCount": engine.pending_count() }))
}

fn handle_sync_connectivity(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(engine) = state.sync.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(online) = req.params.get("online").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "online must be boolean", None);
    };
    let drained = engine.on_connectivity(online);
    ok(
        &req.id,
        json!({ "drained": drained, "status": engine.status() }),
    )
}

fn handle_sync_drain(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(engine) = state.sync.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if !engine.is_online() {
        return ok(
            &req.id,
            json!({ "drained": null, "status": engine.status() }),
        );
    }
    let report = engine.drain();
    ok(
        &req.id,
        json!({ "drained": report, "status": engine.status() }),
    )
}

fn handle_sync_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(engine) = state.sync.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    ok(&req.id, json!(engine.status()))
}

fn handle_sync_pending_items(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(engine) = state.sync.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    ok(&req.id, json!({ "items": engine.pending_items() }))
}

fn handle_sync_dead_letters(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(engine) = state.sync.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    ok(&req.id, json!({ "items": engine.dead_letters() }))
}

fn handle_sync_retry_dead_letter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(engine) = state.sync.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = req.params.get("id").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing id", None);
    };
    match engine.retry_dead_letter(id) {
        Ok(DeadLetterRetry::Requeued(item)) => ok(
            &req.id,
            json!({
                "item": item,
                "superseded": false,
                "pendingCount": engine.pending_count(),
            }),
        ),
        // A newer write for the same row is already queued; the stale one is dropped.
        Ok(DeadLetterRetry::Superseded(item)) => ok(
            &req.id,
            json!({
                "item": item,
                "superseded": true,
                "pendingCount": engine.pending_count(),
            }),
        ),
        Ok(DeadLetterRetry::NotFound) => err(&req.id, "not_found", "dead letter not found", None),
        Err(e) => err(&req.id, "sync_queue_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sync.pendingCount" => Some(handle_sync_pending_count(state, req)),
        "sync.connectivity" => Some(handle_sync_connectivity(state, req)),
        "sync.drain" => Some(handle_sync_drain(state, req)),
        "sync.status" => Some(handle_sync_status(state, req)),
        "sync.pendingItems" => Some(handle_sync_pending_items(state, req)),
        "sync.deadLetters" => Some(handle_sync_dead_letters(state, req)),
        "sync.retryDeadLetter" => Some(handle_sync_retry_dead_letter(state, req)),
        _ => None,
    }
}
