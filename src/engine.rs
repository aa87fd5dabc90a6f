use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::access::{self, AccessScope, DenialEvent};
use crate::calc::{self, EngineError, MarkSubmission};

/// Everything an engine call needs: the store and the principal's resolved
/// capability. Built once per request by the IPC layer.
#[derive(Debug, Clone, Copy)]
pub struct EngineContext<'a> {
    pub conn: &'a Connection,
    pub scope: &'a AccessScope,
}

/// The single authorization chokepoint. Every mutating or
/// student-identifying operation funnels its check outcome through here; a
/// false outcome appends an audit row and fails the request closed.
///
/// The audit write is best-effort: its failure goes to stderr and never
/// displaces the denial.
pub fn ensure_access(
    conn: &Connection,
    scope: &AccessScope,
    allowed: bool,
    resource_type: &str,
    resource_id: &str,
) -> Result<(), EngineError> {
    if allowed {
        return Ok(());
    }
    let event = DenialEvent::new(scope.principal_id(), resource_type, resource_id);
    if let Err(log_err) = access::record_denial(conn, &event) {
        eprintln!(
            "gradebookd: audit write failed for denied {} {}: {}",
            resource_type, resource_id, log_err.message
        );
    }
    Err(EngineError::denied(resource_type, resource_id))
}

#[derive(Debug, Clone)]
pub struct SubmitMark {
    pub student_id: String,
    pub subject_id: String,
    pub term_id: String,
    pub ca_mark: Option<f64>,
    pub exam_mark: Option<f64>,
}

/// One assessment row joined with subject name and weighting, carrying the
/// derived final mark. This is the display shape for every read path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRow {
    pub student_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub term_id: String,
    pub ca_mark: Option<f64>,
    pub exam_mark: Option<f64>,
    pub final_mark: f64,
    pub ca_percentage: f64,
    pub exam_percentage: f64,
}

pub fn submit_mark(ctx: &EngineContext<'_>, req: &SubmitMark) -> Result<AssessmentRow, EngineError> {
    let conn = ctx.conn;

    let class_level_id = student_class_level(conn, &req.student_id)?
        .ok_or_else(|| EngineError::not_found("student not found"))?;
    ensure_access(
        conn,
        ctx.scope,
        ctx.scope.has_student_access(Some(&class_level_id)),
        "student",
        &req.student_id,
    )?;
    ensure_access(
        conn,
        ctx.scope,
        ctx.scope.has_subject_access(&req.subject_id),
        "subject",
        &req.subject_id,
    )?;

    if !subject_exists(conn, &req.subject_id)? {
        return Err(EngineError::not_found("subject not found"));
    }
    if !term_exists(conn, &req.term_id)? {
        return Err(EngineError::not_found("term not found"));
    }

    let weighting = calc::load_weighting(conn, &req.subject_id)?;
    let validated = calc::validate_marks(
        &weighting,
        &MarkSubmission {
            ca_mark: req.ca_mark,
            exam_mark: req.exam_mark,
        },
    )?;

    // Constraint-backed merge upsert: the UNIQUE(student, subject, term) key
    // guarantees one row per triple, and COALESCE keeps fields the request
    // left absent. Last writer wins per field.
    conn.execute(
        "INSERT INTO assessments(id, student_id, subject_id, term_id, ca_mark, exam_mark, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, term_id) DO UPDATE SET
           ca_mark = COALESCE(excluded.ca_mark, ca_mark),
           exam_mark = COALESCE(excluded.exam_mark, exam_mark),
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            &req.student_id,
            &req.subject_id,
            &req.term_id,
            validated.ca_mark,
            validated.exam_mark,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .map_err(EngineError::db)?;

    read_row(conn, &req.student_id, &req.subject_id, &req.term_id)?
        .ok_or_else(|| EngineError::not_found("assessment row missing after upsert"))
}

pub fn list_for_student(
    ctx: &EngineContext<'_>,
    student_id: &str,
    term_id: &str,
) -> Result<Vec<AssessmentRow>, EngineError> {
    let conn = ctx.conn;

    let class_level_id = student_class_level(conn, student_id)?
        .ok_or_else(|| EngineError::not_found("student not found"))?;
    ensure_access(
        conn,
        ctx.scope,
        ctx.scope.has_student_access(Some(&class_level_id)),
        "student",
        student_id,
    )?;
    if !term_exists(conn, term_id)? {
        return Err(EngineError::not_found("term not found"));
    }

    rows_for_student(conn, student_id, term_id)
}

pub fn list_for_class(
    ctx: &EngineContext<'_>,
    class_level_id: &str,
    term_id: &str,
) -> Result<Vec<AssessmentRow>, EngineError> {
    let conn = ctx.conn;

    if !class_level_exists(conn, class_level_id)? {
        return Err(EngineError::not_found("class level not found"));
    }
    ensure_access(
        conn,
        ctx.scope,
        ctx.scope.has_class_access(class_level_id),
        "class",
        class_level_id,
    )?;
    if !term_exists(conn, term_id)? {
        return Err(EngineError::not_found("term not found"));
    }

    let mut stmt = conn
        .prepare(&format!("{} WHERE st.class_level_id = ? AND a.term_id = ? ORDER BY st.name, sub.name", ROW_SELECT))
        .map_err(EngineError::db)?;
    let rows = stmt
        .query_map((class_level_id, term_id), map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(EngineError::db)?;
    Ok(rows)
}

const ROW_SELECT: &str = "SELECT
       a.student_id,
       a.subject_id,
       sub.name,
       a.term_id,
       a.ca_mark,
       a.exam_mark,
       COALESCE(w.ca_percentage, 40.0),
       COALESCE(w.exam_percentage, 60.0)
     FROM assessments a
     JOIN students st ON st.student_id = a.student_id
     JOIN subjects sub ON sub.id = a.subject_id
     LEFT JOIN subject_weightings w ON w.subject_id = a.subject_id";

fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AssessmentRow> {
    let ca_mark: Option<f64> = r.get(4)?;
    let exam_mark: Option<f64> = r.get(5)?;
    Ok(AssessmentRow {
        student_id: r.get(0)?,
        subject_id: r.get(1)?,
        subject_name: r.get(2)?,
        term_id: r.get(3)?,
        ca_mark,
        exam_mark,
        final_mark: calc::final_mark(ca_mark, exam_mark),
        ca_percentage: r.get(6)?,
        exam_percentage: r.get(7)?,
    })
}

/// Rows for one student in one term, subject-name order. Shared by the list
/// operation and the report builder; authorization happens before this.
pub fn rows_for_student(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<Vec<AssessmentRow>, EngineError> {
    let mut stmt = conn
        .prepare(&format!("{} WHERE a.student_id = ? AND a.term_id = ? ORDER BY sub.name", ROW_SELECT))
        .map_err(EngineError::db)?;
    stmt.query_map((student_id, term_id), map_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(EngineError::db)
}

fn read_row(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    term_id: &str,
) -> Result<Option<AssessmentRow>, EngineError> {
    let mut stmt = conn
        .prepare(&format!("{} WHERE a.student_id = ? AND a.subject_id = ? AND a.term_id = ?", ROW_SELECT))
        .map_err(EngineError::db)?;
    let mut rows = stmt
        .query_map((student_id, subject_id, term_id), map_row)
        .map_err(EngineError::db)?;
    rows.next().transpose().map_err(EngineError::db)
}

pub fn student_class_level(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<String>, EngineError> {
    conn.query_row(
        "SELECT class_level_id FROM students WHERE student_id = ?",
        [student_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(EngineError::db)
}

pub fn subject_exists(conn: &Connection, subject_id: &str) -> Result<bool, EngineError> {
    exists(conn, "SELECT 1 FROM subjects WHERE id = ?", subject_id)
}

pub fn term_exists(conn: &Connection, term_id: &str) -> Result<bool, EngineError> {
    exists(conn, "SELECT 1 FROM terms WHERE id = ?", term_id)
}

pub fn class_level_exists(conn: &Connection, class_level_id: &str) -> Result<bool, EngineError> {
    exists(conn, "SELECT 1 FROM class_levels WHERE id = ?", class_level_id)
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, EngineError> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map_err(EngineError::db)
        .map(|v| v.is_some())
}

/// True when an execute failed on a UNIQUE constraint; creates surface these
/// as conflicts carrying the offending key.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(info, _)
            if info.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
