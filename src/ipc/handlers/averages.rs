use crate::calc;
use crate::ipc::error::{err, grade_err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_averages_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let term = match req.params.get("term") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(t) => Some(t),
            None => return err(&req.id, "bad_params", "term must be integer", None),
        },
    };
    match calc::compute_averages(conn, student_id, term) {
        Ok(model) => ok(&req.id, json!(model)),
        Err(e) => grade_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "averages.compute" => Some(handle_averages_compute(state, req)),
        _ => None,
    }
}
