use crate::config;
use crate::ipc::error::{err, grade_err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, GradeEntry};
use crate::store::GradeStore;
use serde_json::{json, Value};

const BULK_SUBMIT_MAX_ENTRIES: usize = 5000;

/// Marks arrive as typed text, but a bare JSON number is accepted too.
fn raw_input(v: Option<&Value>) -> Option<String> {
    match v {
        None | Some(Value::Null) => Some(String::new()),
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(_) => None,
    }
}

fn handle_grades_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(engine)) = (state.db.as_ref(), state.sync.as_mut()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(evaluation_id) = req.params.get("evaluationId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing evaluationId", None);
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(raw) = raw_input(req.params.get("raw")) else {
        return err(&req.id, "bad_params", "raw must be a string or number", None);
    };
    let settings = match config::sync_settings(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let entry = GradeEntry {
        evaluation_id,
        student_id,
        raw: &raw,
        comment: req.params.get("comment").and_then(|v| v.as_str()),
    };
    match ledger::submit_grade(conn, engine, &settings, &entry) {
        Ok(result) => ok(&req.id, json!(result)),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_grades_bulk_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(engine)) = (state.db.as_ref(), state.sync.as_mut()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing entries[]", None);
    };
    if entries.len() > BULK_SUBMIT_MAX_ENTRIES {
        return err(
            &req.id,
            "too_many_entries",
            format!(
                "bulk payload exceeds max entries: {} > {}",
                entries.len(),
                BULK_SUBMIT_MAX_ENTRIES
            ),
            None,
        );
    }
    let settings = match config::sync_settings(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut updated: usize = 0;
    let mut unchanged: usize = 0;
    let mut errors: Vec<Value> = Vec::new();

    for (i, item) in entries.iter().enumerate() {
        let evaluation_id = item.get("evaluationId").and_then(|v| v.as_str());
        let student_id = item.get("studentId").and_then(|v| v.as_str());
        let raw = raw_input(item.get("raw"));
        let (Some(evaluation_id), Some(student_id), Some(raw)) = (evaluation_id, student_id, raw)
        else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": format!("entry at index {} needs evaluationId, studentId and raw", i),
            }));
            continue;
        };

        let entry = GradeEntry {
            evaluation_id,
            student_id,
            raw: &raw,
            comment: item.get("comment").and_then(|v| v.as_str()),
        };
        match ledger::submit_grade(conn, engine, &settings, &entry) {
            Ok(r) if r.changed => updated += 1,
            Ok(_) => unchanged += 1,
            Err(e) => errors.push(json!({
                "index": i,
                "code": e.code(),
                "message": e.to_string(),
            })),
        }
    }

    ok(
        &req.id,
        json!({
            "updated": updated,
            "unchanged": unchanged,
            "rejected": errors.len(),
            "errors": errors,
            "pendingCount": engine.pending_count(),
        }),
    )
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(evaluation_id) = req.params.get("evaluationId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing evaluationId", None);
    };
    match GradeStore::new(conn).get(evaluation_id) {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => grade_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.submit" => Some(handle_grades_submit(state, req)),
        "grades.bulkSubmit" => Some(handle_grades_bulk_submit(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        _ => None,
    }
}
