use serde_json::json;

use crate::calc;
use crate::engine;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, engine_err, required_f64, required_str, resolve_scope};
use crate::ipc::types::{AppState, Request};

fn handle_weighting_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = resolve_scope(conn, req) {
        return e;
    }
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match engine::subject_exists(conn, &subject_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return engine_err(req, e),
    }

    match calc::load_weighting(conn, &subject_id) {
        Ok(w) => ok(
            &req.id,
            json!({
                "subjectId": subject_id,
                "caPercentage": w.ca_percentage,
                "examPercentage": w.exam_percentage,
            }),
        ),
        Err(e) => engine_err(req, e),
    }
}

fn handle_weighting_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, scope) = match resolve_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ca_percentage = match required_f64(req, "caPercentage") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_percentage = match required_f64(req, "examPercentage") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if let Err(e) = engine::ensure_access(conn, &scope, scope.is_admin(), "weighting", &subject_id)
    {
        return engine_err(req, e);
    }
    match engine::subject_exists(conn, &subject_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return engine_err(req, e),
    }

    match calc::store_weighting(conn, &subject_id, ca_percentage, exam_percentage) {
        Ok(w) => ok(
            &req.id,
            json!({
                "subjectId": subject_id,
                "caPercentage": w.ca_percentage,
                "examPercentage": w.exam_percentage,
            }),
        ),
        Err(e) => engine_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "weighting.get" => Some(handle_weighting_get(state, req)),
        "weighting.set" => Some(handle_weighting_set(state, req)),
        _ => None,
    }
}
