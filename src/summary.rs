use std::collections::HashMap;

use rusqlite::Connection;
use serde::Serialize;

use crate::calc::{self, EngineError};
use crate::engine::{self, EngineContext};

/// Completeness of one (student, subject) cell for a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    Complete,
    Partial,
    Missing,
}

pub fn classify(cell: Option<(Option<f64>, Option<f64>)>) -> CellStatus {
    match cell {
        None => CellStatus::Missing,
        Some((Some(_), Some(_))) => CellStatus::Complete,
        // The stored invariant rules out (None, None); classify it as
        // missing rather than trusting it never happens.
        Some((None, None)) => CellStatus::Missing,
        Some(_) => CellStatus::Partial,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermRef {
    pub id: String,
    pub name: String,
    pub academic_year: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassLevelRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStatusRow {
    pub student_id: String,
    pub student_name: String,
    /// One cell per subject, in the model's subject order.
    pub statuses: Vec<CellStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectTotals {
    pub subject_id: String,
    pub complete: usize,
    pub partial: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridTotals {
    pub complete: usize,
    pub partial: usize,
    pub missing: usize,
    /// complete / (students x subjects) x 100, 2 decimals. The denominator
    /// is the literal grid size, including subjects with no marks at all.
    pub completion_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryModel {
    pub term: TermRef,
    pub class_level: ClassLevelRef,
    pub subjects: Vec<SubjectRef>,
    pub rows: Vec<StudentStatusRow>,
    pub per_subject: Vec<SubjectTotals>,
    pub totals: GridTotals,
}

/// Builds the completeness grid for one (term, class). Read-only; recomputed
/// from current rows on every call. Subjects are the ones visible to the
/// principal: all of them for admins, the assigned set otherwise.
pub fn compute_term_summary(
    ctx: &EngineContext<'_>,
    term_id: &str,
    class_level_id: &str,
) -> Result<SummaryModel, EngineError> {
    let conn = ctx.conn;

    let class_level = load_class_level(conn, class_level_id)?
        .ok_or_else(|| EngineError::not_found("class level not found"))?;
    engine::ensure_access(
        conn,
        ctx.scope,
        ctx.scope.has_class_access(class_level_id),
        "class",
        class_level_id,
    )?;
    let term =
        load_term(conn, term_id)?.ok_or_else(|| EngineError::not_found("term not found"))?;

    let students = load_students(conn, class_level_id)?;
    let subjects = load_visible_subjects(conn, ctx.scope)?;

    let mut cell_by_pair: HashMap<(String, String), (Option<f64>, Option<f64>)> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT a.student_id, a.subject_id, a.ca_mark, a.exam_mark
             FROM assessments a
             JOIN students st ON st.student_id = a.student_id
             WHERE a.term_id = ? AND st.class_level_id = ?",
        )
        .map_err(EngineError::db)?;
    let pairs = stmt
        .query_map((term_id, class_level_id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<f64>>(2)?,
                r.get::<_, Option<f64>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(EngineError::db)?;
    for (student_id, subject_id, ca_mark, exam_mark) in pairs {
        cell_by_pair.insert((student_id, subject_id), (ca_mark, exam_mark));
    }

    let mut rows: Vec<StudentStatusRow> = Vec::with_capacity(students.len());
    let mut per_subject: Vec<SubjectTotals> = subjects
        .iter()
        .map(|s| SubjectTotals {
            subject_id: s.id.clone(),
            complete: 0,
            partial: 0,
            missing: 0,
        })
        .collect();
    let mut totals = GridTotals {
        complete: 0,
        partial: 0,
        missing: 0,
        completion_percent: 0.0,
    };

    for (student_id, student_name) in &students {
        let mut statuses = Vec::with_capacity(subjects.len());
        for (i, subject) in subjects.iter().enumerate() {
            let status = classify(
                cell_by_pair
                    .get(&(student_id.clone(), subject.id.clone()))
                    .copied(),
            );
            match status {
                CellStatus::Complete => {
                    per_subject[i].complete += 1;
                    totals.complete += 1;
                }
                CellStatus::Partial => {
                    per_subject[i].partial += 1;
                    totals.partial += 1;
                }
                CellStatus::Missing => {
                    per_subject[i].missing += 1;
                    totals.missing += 1;
                }
            }
            statuses.push(status);
        }
        rows.push(StudentStatusRow {
            student_id: student_id.clone(),
            student_name: student_name.clone(),
            statuses,
        });
    }

    let denominator = students.len() * subjects.len();
    totals.completion_percent = if denominator > 0 {
        calc::round_off_2_decimals(100.0 * totals.complete as f64 / denominator as f64)
    } else {
        0.0
    };

    Ok(SummaryModel {
        term,
        class_level,
        subjects,
        rows,
        per_subject,
        totals,
    })
}

fn load_class_level(
    conn: &Connection,
    class_level_id: &str,
) -> Result<Option<ClassLevelRef>, EngineError> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT id, name FROM class_levels WHERE id = ?",
        [class_level_id],
        |r| {
            Ok(ClassLevelRef {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(EngineError::db)
}

pub fn load_term(conn: &Connection, term_id: &str) -> Result<Option<TermRef>, EngineError> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT id, name, academic_year FROM terms WHERE id = ?",
        [term_id],
        |r| {
            Ok(TermRef {
                id: r.get(0)?,
                name: r.get(1)?,
                academic_year: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(EngineError::db)
}

pub fn load_students(
    conn: &Connection,
    class_level_id: &str,
) -> Result<Vec<(String, String)>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT student_id, name FROM students WHERE class_level_id = ? ORDER BY name")
        .map_err(EngineError::db)?;
    stmt.query_map([class_level_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(EngineError::db)
}

fn load_visible_subjects(
    conn: &Connection,
    scope: &crate::access::AccessScope,
) -> Result<Vec<SubjectRef>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM subjects ORDER BY name")
        .map_err(EngineError::db)?;
    let all = stmt
        .query_map([], |r| {
            Ok(SubjectRef {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(EngineError::db)?;

    if scope.is_admin() {
        return Ok(all);
    }
    Ok(all
        .into_iter()
        .filter(|s| scope.has_subject_access(&s.id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_covers_all_three_states() {
        assert_eq!(classify(None), CellStatus::Missing);
        assert_eq!(classify(Some((Some(10.0), None))), CellStatus::Partial);
        assert_eq!(classify(Some((None, Some(40.0)))), CellStatus::Partial);
        assert_eq!(
            classify(Some((Some(10.0), Some(40.0)))),
            CellStatus::Complete
        );
        assert_eq!(classify(Some((None, None))), CellStatus::Missing);
    }
}
