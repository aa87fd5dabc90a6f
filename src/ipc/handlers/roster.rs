use serde_json::json;
use uuid::Uuid;

use crate::calc::EngineError;
use crate::engine;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, engine_err, required_str, resolve_scope};
use crate::ipc::types::{AppState, Request};

const STUDENT_ID_MAX_CHARS: usize = 50;

fn handle_class_levels_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = engine::ensure_access(conn, &scope, scope.is_admin(), "class", &name) {
        return engine_err(req, e);
    }

    let class_level_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO class_levels(id, name) VALUES(?, ?)",
        (&class_level_id, &name),
    ) {
        if engine::is_unique_violation(&e) {
            return engine_err(
                req,
                EngineError::conflict(
                    "a class level with this name already exists",
                    Some(json!({ "name": name })),
                ),
            );
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "classLevelId": class_level_id, "name": name }))
}

fn handle_class_levels_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Non-admins see only what their assignments grant.
    let classes: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(id, _)| scope.has_class_access(id))
        .map(|(id, name)| json!({ "id": id, "name": name }))
        .collect();
    ok(&req.id, json!({ "classLevels": classes }))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = engine::ensure_access(conn, &scope, scope.is_admin(), "subject", &name) {
        return engine_err(req, e);
    }

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name) VALUES(?, ?)",
        (&subject_id, &name),
    ) {
        if engine::is_unique_violation(&e) {
            return engine_err(
                req,
                EngineError::conflict(
                    "a subject with this name already exists",
                    Some(json!({ "name": name })),
                ),
            );
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "subjectId": subject_id, "name": name }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let subjects: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(id, _)| scope.has_subject_access(id))
        .map(|(id, name)| json!({ "id": id, "name": name }))
        .collect();
    ok(&req.id, json!({ "subjects": subjects }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (_, scope) = match resolve_scope(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let class_level_id = match required_str(req, "classLevelId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if let Err(e) = engine::ensure_access(conn, &scope, scope.is_admin(), "student", &student_id) {
        return engine_err(req, e);
    }

    if student_id.is_empty() || student_id.chars().count() > STUDENT_ID_MAX_CHARS {
        return engine_err(
            req,
            EngineError::validation(format!(
                "studentId must be 1 to {} characters",
                STUDENT_ID_MAX_CHARS
            ))
            .with_details(json!({ "studentId": student_id })),
        );
    }
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    match engine::class_level_exists(conn, &class_level_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class level not found", None),
        Err(e) => return engine_err(req, e),
    }

    if let Err(e) = conn.execute(
        "INSERT INTO students(student_id, name, class_level_id) VALUES(?, ?, ?)",
        (&student_id, &name, &class_level_id),
    ) {
        if engine::is_unique_violation(&e) {
            return engine_err(
                req,
                EngineError::conflict(
                    "a student with this id already exists",
                    Some(json!({ "studentId": student_id })),
                ),
            );
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match engine::class_level_exists(conn, &class_level_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class level not found", None),
        Err(e) => return engine_err(req, e),
    }
    if let Err(e) = engine::ensure_access(
        conn,
        &scope,
        scope.has_class_access(&class_level_id),
        "class",
        &class_level_id,
    ) {
        return engine_err(req, e);
    }

    let mut stmt = match conn
        .prepare("SELECT student_id, name FROM students WHERE class_level_id = ? ORDER BY name")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_level_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classLevels.create" => Some(handle_class_levels_create(state, req)),
        "classLevels.list" => Some(handle_class_levels_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
