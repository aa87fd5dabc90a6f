use rusqlite::Connection;
use serde_json::json;

use crate::engine;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, engine_err, required_str, resolve_scope};
use crate::ipc::types::{AppState, Request};

fn required_principal_id(req: &Request) -> Result<i64, serde_json::Value> {
    req.params
        .get("principalId")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", "missing principalId", None))
}

enum Target {
    Class,
    Subject,
}

impl Target {
    fn key(&self) -> &'static str {
        match self {
            Target::Class => "classLevelId",
            Target::Subject => "subjectId",
        }
    }

    fn table_column(&self) -> (&'static str, &'static str) {
        match self {
            Target::Class => ("teacher_class_assignments", "class_level_id"),
            Target::Subject => ("teacher_subject_assignments", "subject_id"),
        }
    }

    fn exists(&self, conn: &Connection, id: &str) -> Result<bool, crate::calc::EngineError> {
        match self {
            Target::Class => engine::class_level_exists(conn, id),
            Target::Subject => engine::subject_exists(conn, id),
        }
    }

    fn missing(&self) -> &'static str {
        match self {
            Target::Class => "class level not found",
            Target::Subject => "subject not found",
        }
    }
}

fn handle_grant(state: &mut AppState, req: &Request, target: Target) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, scope) = match resolve_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grantee = match required_principal_id(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let target_id = match required_str(req, target.key()) {
        Ok(v) => v,
        Err(e) => return e,
    };

    if let Err(e) = engine::ensure_access(conn, &scope, scope.is_admin(), "assignment", &target_id)
    {
        return engine_err(req, e);
    }
    match target.exists(conn, &target_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", target.missing(), None),
        Err(e) => return engine_err(req, e),
    }

    // Granting twice is a no-op; the unique pair absorbs it.
    let (table, column) = target.table_column();
    let sql = format!(
        "INSERT INTO {}(principal_id, {}) VALUES(?, ?)
         ON CONFLICT(principal_id, {}) DO NOTHING",
        table, column, column
    );
    if let Err(e) = conn.execute(&sql, (grantee, &target_id)) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_revoke(state: &mut AppState, req: &Request, target: Target) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, scope) = match resolve_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grantee = match required_principal_id(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let target_id = match required_str(req, target.key()) {
        Ok(v) => v,
        Err(e) => return e,
    };

    if let Err(e) = engine::ensure_access(conn, &scope, scope.is_admin(), "assignment", &target_id)
    {
        return engine_err(req, e);
    }

    let (table, column) = target.table_column();
    let sql = format!("DELETE FROM {} WHERE principal_id = ? AND {} = ?", table, column);
    let removed = match conn.execute(&sql, (grantee, &target_id)) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "ok": true, "removed": removed }))
}

/// getAccessibleClasses: the classes the principal's scope resolves to,
/// with names for display. Empty for an unassigned teacher, everything for
/// an admin.
fn handle_access_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, scope) = match resolve_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare("SELECT id, name FROM class_levels ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(all) => {
            let classes: Vec<serde_json::Value> = all
                .into_iter()
                .filter(|(id, _)| scope.has_class_access(id))
                .map(|(id, name)| json!({ "id": id, "name": name }))
                .collect();
            ok(&req.id, json!({ "classLevels": classes }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_access_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, scope) = match resolve_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare("SELECT id, name FROM subjects ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(all) => {
            let subjects: Vec<serde_json::Value> = all
                .into_iter()
                .filter(|(id, _)| scope.has_subject_access(id))
                .map(|(id, name)| json!({ "id": id, "name": name }))
                .collect();
            ok(&req.id, json!({ "subjects": subjects }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.grantClass" => Some(handle_grant(state, req, Target::Class)),
        "assignments.revokeClass" => Some(handle_revoke(state, req, Target::Class)),
        "assignments.grantSubject" => Some(handle_grant(state, req, Target::Subject)),
        "assignments.revokeSubject" => Some(handle_revoke(state, req, Target::Subject)),
        "access.classes" => Some(handle_access_classes(state, req)),
        "access.subjects" => Some(handle_access_subjects(state, req)),
        _ => None,
    }
}
