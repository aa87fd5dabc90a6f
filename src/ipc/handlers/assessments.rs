use serde_json::json;

use crate::engine::{self, EngineContext, SubmitMark};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, engine_err, optional_f64, required_str, resolve_scope};
use crate::ipc::types::{AppState, Request};

fn handle_submit_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // final_mark is derived, full stop. A client sending one is confused
    // and gets told so rather than silently ignored.
    if req.params.get("finalMark").is_some() {
        return err(
            &req.id,
            "bad_params",
            "finalMark is derived and cannot be submitted",
            None,
        );
    }

    let ca_mark = match optional_f64(req, "caMark") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_mark = match optional_f64(req, "examMark") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = EngineContext {
        conn,
        scope: &scope,
    };
    match engine::submit_mark(
        &ctx,
        &SubmitMark {
            student_id,
            subject_id,
            term_id,
            ca_mark,
            exam_mark,
        },
    ) {
        Ok(row) => ok(&req.id, json!({ "assessment": row })),
        Err(e) => engine_err(req, e),
    }
}

fn handle_list_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match engine::list_for_student(&ctx, &student_id, &term_id) {
        Ok(rows) => ok(&req.id, json!({ "assessments": rows })),
        Err(e) => engine_err(req, e),
    }
}

fn handle_list_for_class(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match engine::list_for_class(&ctx, &class_level_id, &term_id) {
        Ok(rows) => ok(&req.id, json!({ "assessments": rows })),
        Err(e) => engine_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.submitMark" => Some(handle_submit_mark(state, req)),
        "assessments.listForStudent" => Some(handle_list_for_student(state, req)),
        "assessments.listForClass" => Some(handle_list_for_class(state, req)),
        _ => None,
    }
}
