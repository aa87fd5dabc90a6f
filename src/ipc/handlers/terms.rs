use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::calc::EngineError;
use crate::engine;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, engine_err, required_str, resolve_scope};
use crate::ipc::types::{AppState, Request};

/// "YYYY/YYYY" with the second year exactly one after the first.
fn validate_academic_year(value: &str) -> Result<(), EngineError> {
    let bad = || {
        EngineError::validation("academic year must be YYYY/YYYY with consecutive years")
            .with_details(json!({ "academicYear": value }))
    };

    let Some((first, second)) = value.split_once('/') else {
        return Err(bad());
    };
    if first.len() != 4 || second.len() != 4 {
        return Err(bad());
    }
    let (Ok(first), Ok(second)) = (first.parse::<i32>(), second.parse::<i32>()) else {
        return Err(bad());
    };
    if second != first + 1 {
        return Err(bad());
    }
    Ok(())
}

fn validate_dates(start_date: &str, end_date: &str) -> Result<(), EngineError> {
    let parse = |label: &str, value: &str| {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
            EngineError::validation(format!("{} must be a YYYY-MM-DD date", label))
                .with_details(json!({ "value": value }))
        })
    };
    let start = parse("startDate", start_date)?;
    let end = parse("endDate", end_date)?;
    if start > end {
        return Err(EngineError::validation("startDate must not be after endDate")
            .with_details(json!({ "startDate": start_date, "endDate": end_date })));
    }
    Ok(())
}

fn handle_terms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = resolve_scope(conn, req) {
        return e;
    }

    let mut stmt = match conn.prepare(
        "SELECT id, name, academic_year, start_date, end_date, is_active
         FROM terms
         ORDER BY academic_year, start_date",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "academicYear": row.get::<_, String>(2)?,
                "startDate": row.get::<_, String>(3)?,
                "endDate": row.get::<_, String>(4)?,
                "isActive": row.get::<_, i64>(5)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(terms) => ok(&req.id, json!({ "terms": terms })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_terms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, scope) = match resolve_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let start_date = match required_str(req, "startDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let end_date = match required_str(req, "endDate") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let is_active = req
        .params
        .get("isActive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if let Err(e) = engine::ensure_access(conn, &scope, scope.is_admin(), "term", &name) {
        return engine_err(req, e);
    }
    if let Err(e) = validate_academic_year(&academic_year) {
        return engine_err(req, e);
    }
    if let Err(e) = validate_dates(&start_date, &end_date) {
        return engine_err(req, e);
    }

    let term_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO terms(id, name, academic_year, start_date, end_date, is_active)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&term_id, &name, &academic_year, &start_date, &end_date, is_active as i64),
    ) {
        if engine::is_unique_violation(&e) {
            return engine_err(
                req,
                EngineError::conflict(
                    "a term with this name already exists in the academic year",
                    Some(json!({ "name": name, "academicYear": academic_year })),
                ),
            );
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "termId": term_id }))
}

fn handle_terms_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    if let Err(e) = engine::ensure_access(conn, &scope, scope.is_admin(), "term", &term_id) {
        return engine_err(req, e);
    }

    let current: Option<(String, String, String, String, i64)> = match conn
        .query_row(
            "SELECT name, academic_year, start_date, end_date, is_active FROM terms WHERE id = ?",
            [&term_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((cur_name, cur_year, cur_start, cur_end, cur_active)) = current else {
        return err(&req.id, "not_found", "term not found", None);
    };

    let name = req
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .unwrap_or(cur_name);
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let academic_year = req
        .params
        .get("academicYear")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .unwrap_or(cur_year);
    let start_date = req
        .params
        .get("startDate")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .unwrap_or(cur_start);
    let end_date = req
        .params
        .get("endDate")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .unwrap_or(cur_end);
    let is_active = req
        .params
        .get("isActive")
        .and_then(|v| v.as_bool())
        .unwrap_or(cur_active != 0);

    if let Err(e) = validate_academic_year(&academic_year) {
        return engine_err(req, e);
    }
    if let Err(e) = validate_dates(&start_date, &end_date) {
        return engine_err(req, e);
    }

    if let Err(e) = conn.execute(
        "UPDATE terms SET name = ?, academic_year = ?, start_date = ?, end_date = ?, is_active = ?
         WHERE id = ?",
        (&name, &academic_year, &start_date, &end_date, is_active as i64, &term_id),
    ) {
        if engine::is_unique_violation(&e) {
            return engine_err(
                req,
                EngineError::conflict(
                    "a term with this name already exists in the academic year",
                    Some(json!({ "name": name, "academicYear": academic_year })),
                ),
            );
        }
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_terms_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    if let Err(e) = engine::ensure_access(conn, &scope, scope.is_admin(), "term", &term_id) {
        return engine_err(req, e);
    }

    match engine::term_exists(conn, &term_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "term not found", None),
        Err(e) => return engine_err(req, e),
    }

    // A term stays while assessment rows reference it.
    let referencing: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM assessments WHERE term_id = ?",
        [&term_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if referencing > 0 {
        return engine_err(
            req,
            EngineError::conflict(
                "term has assessments and cannot be deleted",
                Some(json!({ "termId": term_id, "assessmentCount": referencing })),
            ),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM terms WHERE id = ?", [&term_id]) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "terms.list" => Some(handle_terms_list(state, req)),
        "terms.create" => Some(handle_terms_create(state, req)),
        "terms.update" => Some(handle_terms_update(state, req)),
        "terms.delete" => Some(handle_terms_delete(state, req)),
        _ => None,
    }
}
