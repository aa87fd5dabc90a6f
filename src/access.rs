use std::collections::HashSet;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calc::EngineError;

/// The authenticated actor attached to every request. Credential
/// verification happens upstream; this value is trusted verbatim.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// The resolved capability of one principal: the class-level and subject id
/// sets their assignment rows grant. Resolved once per request and threaded
/// through every downstream check. Membership tests are pure; admins pass
/// every test without holding explicit sets.
///
/// Policy is deny-by-default: zero assignment rows mean empty sets, and by
/// transitivity zero visible students.
#[derive(Debug, Clone)]
pub struct AccessScope {
    principal_id: i64,
    admin: bool,
    class_ids: HashSet<String>,
    subject_ids: HashSet<String>,
}

impl AccessScope {
    pub fn resolve(conn: &Connection, principal: &Principal) -> Result<Self, EngineError> {
        if principal.is_admin() {
            return Ok(Self {
                principal_id: principal.id,
                admin: true,
                class_ids: HashSet::new(),
                subject_ids: HashSet::new(),
            });
        }

        let class_ids = query_id_set(
            conn,
            "SELECT class_level_id FROM teacher_class_assignments WHERE principal_id = ?",
            principal.id,
        )?;
        let subject_ids = query_id_set(
            conn,
            "SELECT subject_id FROM teacher_subject_assignments WHERE principal_id = ?",
            principal.id,
        )?;

        Ok(Self {
            principal_id: principal.id,
            admin: false,
            class_ids,
            subject_ids,
        })
    }

    pub fn principal_id(&self) -> i64 {
        self.principal_id
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    pub fn has_class_access(&self, class_level_id: &str) -> bool {
        self.admin || self.class_ids.contains(class_level_id)
    }

    pub fn has_subject_access(&self, subject_id: &str) -> bool {
        self.admin || self.subject_ids.contains(subject_id)
    }

    /// Student visibility rides entirely on the student's class level. A
    /// student without one is invisible to non-admins.
    pub fn has_student_access(&self, class_level_id: Option<&str>) -> bool {
        if self.admin {
            return true;
        }
        class_level_id
            .map(|id| self.class_ids.contains(id))
            .unwrap_or(false)
    }

    pub fn class_ids(&self) -> &HashSet<String> {
        &self.class_ids
    }

    pub fn subject_ids(&self) -> &HashSet<String> {
        &self.subject_ids
    }
}

fn query_id_set(
    conn: &Connection,
    sql: &str,
    principal_id: i64,
) -> Result<HashSet<String>, EngineError> {
    let mut stmt = conn.prepare(sql).map_err(EngineError::db)?;
    stmt.query_map([principal_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(EngineError::db)
}

/// One denied attempt, as a value. The resolver hands this back instead of
/// writing anywhere itself; the caller decides where it lands.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenialEvent {
    pub principal_id: i64,
    pub resource_type: String,
    pub resource_id: String,
    pub denied_at: String,
}

impl DenialEvent {
    pub fn new(principal_id: i64, resource_type: &str, resource_id: &str) -> Self {
        Self {
            principal_id,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            denied_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Appends one audit row. Callers treat a failure here as best-effort: it
/// must never displace the denial being reported.
pub fn record_denial(conn: &Connection, event: &DenialEvent) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO access_denials(id, principal_id, resource_type, resource_id, denied_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            event.principal_id,
            &event.resource_type,
            &event.resource_id,
            &event.denied_at,
        ),
    )
    .map_err(EngineError::db)?;
    Ok(())
}
