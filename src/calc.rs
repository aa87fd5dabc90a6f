use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub const DEFAULT_CA_PERCENTAGE: f64 = 40.0;
pub const DEFAULT_EXAM_PERCENTAGE: f64 = 60.0;

/// Slack allowed on the CA+Exam sum, to absorb float noise in submitted
/// percentages without letting a genuinely wrong split through.
pub const WEIGHTING_SUM_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    AccessDenied,
    NotFound,
    Conflict,
    Db,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_failed",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Db => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            message: message.into(),
            details: None,
        }
    }

    pub fn denied(resource_type: &str, resource_id: &str) -> Self {
        Self {
            kind: ErrorKind::AccessDenied,
            message: format!("access denied for {} {}", resource_type, resource_id),
            details: Some(serde_json::json!({
                "resourceType": resource_type,
                "resourceId": resource_id,
            })),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: what.into(),
            details: None,
        }
    }

    pub fn conflict(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self {
            kind: ErrorKind::Conflict,
            message: message.into(),
            details,
        }
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self {
            kind: ErrorKind::Db,
            message: e.to_string(),
            details: None,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// The CA/Exam percentage split for one subject. Components always sum to
/// 100 within WEIGHTING_SUM_TOLERANCE once validated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Weighting {
    pub ca_percentage: f64,
    pub exam_percentage: f64,
}

impl Default for Weighting {
    fn default() -> Self {
        Self {
            ca_percentage: DEFAULT_CA_PERCENTAGE,
            exam_percentage: DEFAULT_EXAM_PERCENTAGE,
        }
    }
}

pub fn validate_weighting(ca_percentage: f64, exam_percentage: f64) -> Result<Weighting, EngineError> {
    for (label, value) in [("CA", ca_percentage), ("Exam", exam_percentage)] {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(EngineError::validation(format!(
                "{} percentage must be between 0 and 100",
                label
            ))
            .with_details(serde_json::json!({ "value": value })));
        }
    }
    let sum = ca_percentage + exam_percentage;
    if (sum - 100.0).abs() > WEIGHTING_SUM_TOLERANCE {
        return Err(EngineError::validation(
            "CA and Exam percentages must sum to 100",
        )
        .with_details(serde_json::json!({ "sum": sum })));
    }
    Ok(Weighting {
        ca_percentage,
        exam_percentage,
    })
}

/// A proposed mark pair as submitted. Absent fields stay absent; a partial
/// update never turns an omission into a stored null.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarkSubmission {
    pub ca_mark: Option<f64>,
    pub exam_mark: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedMarks {
    pub ca_mark: Option<f64>,
    pub exam_mark: Option<f64>,
    pub final_mark: f64,
}

/// Bounds a submitted pair against the weighting and derives the final mark.
/// Pure; re-run on every write. It never consults the stored row.
pub fn validate_marks(
    weighting: &Weighting,
    submission: &MarkSubmission,
) -> Result<ValidatedMarks, EngineError> {
    if submission.ca_mark.is_none() && submission.exam_mark.is_none() {
        return Err(EngineError::validation("at least one mark required"));
    }

    let components = [
        ("CA", submission.ca_mark, weighting.ca_percentage),
        ("Exam", submission.exam_mark, weighting.exam_percentage),
    ];
    for (label, mark, bound) in components {
        let Some(value) = mark else {
            continue;
        };
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::validation(format!(
                "{} mark cannot be negative",
                label
            ))
            .with_details(serde_json::json!({ "value": value })));
        }
        if value > bound {
            return Err(EngineError::validation(format!(
                "{} mark cannot exceed {}",
                label,
                format_bound(bound)
            ))
            .with_details(serde_json::json!({ "value": value, "bound": bound })));
        }
    }

    Ok(ValidatedMarks {
        ca_mark: submission.ca_mark,
        exam_mark: submission.exam_mark,
        final_mark: final_mark(submission.ca_mark, submission.exam_mark),
    })
}

/// Derived, never stored: coalesce(ca, 0) + coalesce(exam, 0).
pub fn final_mark(ca_mark: Option<f64>, exam_mark: Option<f64>) -> f64 {
    ca_mark.unwrap_or(0.0) + exam_mark.unwrap_or(0.0)
}

/// 2-decimal rounding for display figures (completion percentages, term
/// averages). Raw marks are never rounded.
pub fn round_off_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn format_bound(bound: f64) -> String {
    if bound.fract() == 0.0 {
        format!("{}", bound as i64)
    } else {
        format!("{}", bound)
    }
}

/// Weighting Store read: the stored split, or the implicit default when the
/// subject has no row.
pub fn load_weighting(conn: &Connection, subject_id: &str) -> Result<Weighting, EngineError> {
    let row: Option<(f64, f64)> = conn
        .query_row(
            "SELECT ca_percentage, exam_percentage FROM subject_weightings WHERE subject_id = ?",
            [subject_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(EngineError::db)?;

    Ok(row
        .map(|(ca_percentage, exam_percentage)| Weighting {
            ca_percentage,
            exam_percentage,
        })
        .unwrap_or_default())
}

/// Weighting Store write: validates, then replaces any prior row for the
/// subject. Idempotent.
pub fn store_weighting(
    conn: &Connection,
    subject_id: &str,
    ca_percentage: f64,
    exam_percentage: f64,
) -> Result<Weighting, EngineError> {
    let weighting = validate_weighting(ca_percentage, exam_percentage)?;
    conn.execute(
        "INSERT INTO subject_weightings(subject_id, ca_percentage, exam_percentage)
         VALUES(?, ?, ?)
         ON CONFLICT(subject_id) DO UPDATE SET
           ca_percentage = excluded.ca_percentage,
           exam_percentage = excluded.exam_percentage",
        (subject_id, weighting.ca_percentage, weighting.exam_percentage),
    )
    .map_err(EngineError::db)?;
    Ok(weighting)
}
