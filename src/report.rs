use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::calc::{self, EngineError};
use crate::engine::{self, AssessmentRow, EngineContext};
use crate::summary::{self, TermRef};

/// One student's term report: the per-subject rows plus the term average.
/// The renderer downstream consumes this shape as-is.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student_id: String,
    pub student_name: String,
    pub class_level_id: String,
    pub term: TermRef,
    pub subjects: Vec<AssessmentRow>,
    /// Mean of the derived final marks over only the subjects that have an
    /// assessment row; absent subjects are excluded, not counted as zero.
    /// None when the student has no rows in the term.
    pub term_average: Option<f64>,
}

pub fn student_report(
    ctx: &EngineContext<'_>,
    student_id: &str,
    term_id: &str,
) -> Result<StudentReport, EngineError> {
    let conn = ctx.conn;

    let (student_name, class_level_id) = load_student(conn, student_id)?
        .ok_or_else(|| EngineError::not_found("student not found"))?;
    engine::ensure_access(
        conn,
        ctx.scope,
        ctx.scope.has_student_access(Some(&class_level_id)),
        "student",
        student_id,
    )?;
    let term = summary::load_term(conn, term_id)?
        .ok_or_else(|| EngineError::not_found("term not found"))?;

    build_report(conn, student_id, &student_name, &class_level_id, &term)
}

/// Term reports for every student in a class. Authorizes the class once;
/// every roster member's class level is the authorized one by construction.
/// Presentation order is the caller's concern; rows come back in roster
/// (name) order as stored.
pub fn class_report(
    ctx: &EngineContext<'_>,
    class_level_id: &str,
    term_id: &str,
) -> Result<Vec<StudentReport>, EngineError> {
    let conn = ctx.conn;

    if !engine::class_level_exists(conn, class_level_id)? {
        return Err(EngineError::not_found("class level not found"));
    }
    engine::ensure_access(
        conn,
        ctx.scope,
        ctx.scope.has_class_access(class_level_id),
        "class",
        class_level_id,
    )?;
    let term = summary::load_term(conn, term_id)?
        .ok_or_else(|| EngineError::not_found("term not found"))?;

    let students = summary::load_students(conn, class_level_id)?;
    let mut reports = Vec::with_capacity(students.len());
    for (student_id, student_name) in &students {
        reports.push(build_report(
            conn,
            student_id,
            student_name,
            class_level_id,
            &term,
        )?);
    }
    Ok(reports)
}

fn build_report(
    conn: &Connection,
    student_id: &str,
    student_name: &str,
    class_level_id: &str,
    term: &TermRef,
) -> Result<StudentReport, EngineError> {
    let subjects = engine::rows_for_student(conn, student_id, &term.id)?;
    let term_average = term_average(&subjects);
    Ok(StudentReport {
        student_id: student_id.to_string(),
        student_name: student_name.to_string(),
        class_level_id: class_level_id.to_string(),
        term: term.clone(),
        subjects,
        term_average,
    })
}

fn term_average(rows: &[AssessmentRow]) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    let sum: f64 = rows.iter().map(|r| r.final_mark).sum();
    Some(calc::round_off_2_decimals(sum / rows.len() as f64))
}

fn load_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<(String, String)>, EngineError> {
    conn.query_row(
        "SELECT name, class_level_id FROM students WHERE student_id = ?",
        [student_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
    .map_err(EngineError::db)
}
