use crate::catalog;
use crate::ipc::error::{err, grade_err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn opt_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn handle_classes_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(name) = opt_str(req, "name") else {
        return err(&req.id, "bad_params", "missing name", None);
    };
    match catalog::upsert_class(conn, opt_str(req, "id"), name, opt_str(req, "level")) {
        Ok(class) => ok(&req.id, json!({ "class": class })),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_subjects_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(name) = opt_str(req, "name") else {
        return err(&req.id, "bad_params", "missing name", None);
    };
    let coefficient = match req.params.get("coefficient") {
        None => 1.0,
        Some(v) => match v.as_f64() {
            Some(c) => c,
            None => return err(&req.id, "bad_params", "coefficient must be a number", None),
        },
    };
    match catalog::upsert_subject(conn, opt_str(req, "id"), name, coefficient) {
        Ok(subject) => ok(&req.id, json!({ "subject": subject })),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_subjects_set_coefficient(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(subject_id) = opt_str(req, "subjectId") else {
        return err(&req.id, "bad_params", "missing subjectId", None);
    };
    let Some(coefficient) = req.params.get("coefficient").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing coefficient", None);
    };
    match catalog::set_subject_coefficient(conn, subject_id, coefficient) {
        Ok(true) => ok(&req.id, json!({ "ok": true })),
        Ok(false) => err(&req.id, "not_found", "subject not found", None),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match catalog::list_subjects(conn) {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_evaluations_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(class_id) = opt_str(req, "classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };
    let Some(subject_id) = opt_str(req, "subjectId") else {
        return err(&req.id, "bad_params", "missing subjectId", None);
    };
    let term = match req.params.get("term") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(t) if t >= 1 => Some(t),
            _ => return err(&req.id, "bad_params", "term must be a positive integer", None),
        },
    };
    let kind = opt_str(req, "kind").unwrap_or("devoir");
    match catalog::create_evaluation(conn, class_id, subject_id, term, kind, opt_str(req, "date"))
    {
        Ok(evaluation) => ok(&req.id, json!({ "evaluation": evaluation })),
        Err(e) => grade_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.upsert" => Some(handle_classes_upsert(state, req)),
        "subjects.upsert" => Some(handle_subjects_upsert(state, req)),
        "subjects.setCoefficient" => Some(handle_subjects_set_coefficient(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "evaluations.create" => Some(handle_evaluations_create(state, req)),
        _ => None,
    }
}
