use rusqlite::Connection;
use serde_json::json;

use crate::access::{AccessScope, Principal};
use crate::calc::EngineError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Absent and null both mean "not submitted". A present non-numeric value is
/// a malformed request, not an absent field.
pub fn optional_f64(req: &Request, key: &str) -> Result<Option<f64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a number", key),
                Some(json!({ "value": v })),
            )
        }),
    }
}

/// Every engine method carries params.principal = {id, role}; the value is
/// trusted verbatim (authentication happens upstream).
pub fn principal(req: &Request) -> Result<Principal, serde_json::Value> {
    let Some(raw) = req.params.get("principal") else {
        return Err(err(&req.id, "bad_params", "missing params.principal", None));
    };
    serde_json::from_value(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("malformed principal: {}", e),
            None,
        )
    })
}

pub fn resolve_scope(
    conn: &Connection,
    req: &Request,
) -> Result<(Principal, AccessScope), serde_json::Value> {
    let principal = principal(req)?;
    let scope = AccessScope::resolve(conn, &principal).map_err(|e| engine_err(req, e))?;
    Ok((principal, scope))
}

pub fn engine_err(req: &Request, e: EngineError) -> serde_json::Value {
    err(&req.id, e.code(), e.message, e.details)
}
