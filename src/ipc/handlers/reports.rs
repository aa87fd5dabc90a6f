use serde_json::json;

use crate::engine::EngineContext;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, engine_err, required_str, resolve_scope};
use crate::ipc::types::{AppState, Request};
use crate::report;

fn handle_report_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, scope) = match resolve_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = EngineContext {
        conn,
        scope: &scope,
    };
    match report::student_report(&ctx, &student_id, &term_id) {
        Ok(r) => ok(&req.id, json!({ "report": r })),
        Err(e) => engine_err(req, e),
    }
}

fn handle_report_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, scope) = match resolve_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_level_id = match required_str(req, "classLevelId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = EngineContext {
        conn,
        scope: &scope,
    };
    match report::class_report(&ctx, &class_level_id, &term_id) {
        Ok(reports) => ok(&req.id, json!({ "reports": reports })),
        Err(e) => engine_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.student" => Some(handle_report_student(state, req)),
        "reports.class" => Some(handle_report_class(state, req)),
        _ => None,
    }
}
