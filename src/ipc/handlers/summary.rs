use serde_json::json;

use crate::engine::EngineContext;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, engine_err, required_str, resolve_scope};
use crate::ipc::types::{AppState, Request};
use crate::summary;

fn handle_summary_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, scope) = match resolve_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_level_id = match required_str(req, "classLevelId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = EngineContext {
        conn,
        scope: &scope,
    };
    match summary::compute_term_summary(&ctx, &term_id, &class_level_id) {
        Ok(model) => ok(&req.id, json!(model)),
        Err(e) => engine_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "summary.get" => Some(handle_summary_get(state, req)),
        _ => None,
    }
}
