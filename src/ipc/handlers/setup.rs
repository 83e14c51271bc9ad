use crate::config::{self, SetupSection};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::sync::{writer_from_env, RetryPolicy};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::warn;

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match config::load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let current = match config::update_section(conn, section, patch_obj) {
        Ok(Ok(v)) => v,
        Ok(Err(msg)) => return err(&req.id, "bad_params", msg, None),
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if section == SetupSection::Sync {
        if let (Ok(settings), Some(engine)) = (config::sync_settings(conn), state.sync.as_mut()) {
            engine.set_policy(RetryPolicy {
                max_rejections: settings.max_rejections,
            });
            match writer_from_env(Duration::from_secs(settings.request_timeout_secs)) {
                Ok(writer) => engine.set_writer(writer),
                Err(e) => warn!(error = %e, "keeping previous remote writer"),
            }
        }
    }
    ok(&req.id, json!({ "ok": true, "section": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
