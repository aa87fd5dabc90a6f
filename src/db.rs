use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradebook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_levels(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    // One row per subject; absence means the implicit 40/60 split.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_weightings(
            subject_id TEXT PRIMARY KEY,
            ca_percentage REAL NOT NULL,
            exam_percentage REAL NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            UNIQUE(name, academic_year)
        )",
        [],
    )?;

    // student_id is the business key (<= 50 chars, checked at write time).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            student_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_level_id TEXT NOT NULL,
            FOREIGN KEY(class_level_id) REFERENCES class_levels(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_level ON students(class_level_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_class_assignments(
            principal_id INTEGER NOT NULL,
            class_level_id TEXT NOT NULL,
            UNIQUE(principal_id, class_level_id),
            FOREIGN KEY(class_level_id) REFERENCES class_levels(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_assignments_principal
         ON teacher_class_assignments(principal_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_subject_assignments(
            principal_id INTEGER NOT NULL,
            subject_id TEXT NOT NULL,
            UNIQUE(principal_id, subject_id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_assignments_principal
         ON teacher_subject_assignments(principal_id)",
        [],
    )?;

    // The natural key carries the concurrency control: the UNIQUE constraint
    // plus the merge upsert in engine::submit_mark. final_mark is derived at
    // read time and has no column here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            ca_mark REAL,
            exam_mark REAL,
            updated_at TEXT,
            UNIQUE(student_id, subject_id, term_id),
            FOREIGN KEY(student_id) REFERENCES students(student_id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    ensure_assessments_updated_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_term ON assessments(term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_student_term
         ON assessments(student_id, term_id)",
        [],
    )?;

    // Append-only; written once per denied attempt, never read back here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS access_denials(
            id TEXT PRIMARY KEY,
            principal_id INTEGER NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            denied_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_access_denials_principal
         ON access_denials(principal_id)",
        [],
    )?;

    Ok(())
}

fn ensure_assessments_updated_at(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces predate the updated_at column. Add it when missing.
    if table_has_column(conn, "assessments", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE assessments ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
