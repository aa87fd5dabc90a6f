use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn admin() -> serde_json::Value {
    json!({ "id": 1, "role": "admin" })
}

fn seed_world(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> (String, String, String) {
    let class = request_ok(
        stdin,
        reader,
        "seed-class",
        "classLevels.create",
        json!({ "principal": admin(), "name": "JSS 3" }),
    );
    let class_level_id = class
        .get("classLevelId")
        .and_then(|v| v.as_str())
        .expect("classLevelId")
        .to_string();

    let subject = request_ok(
        stdin,
        reader,
        "seed-subject",
        "subjects.create",
        json!({ "principal": admin(), "name": "English" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();

    let term = request_ok(
        stdin,
        reader,
        "seed-term",
        "terms.create",
        json!({
            "principal": admin(),
            "name": "Second Term",
            "academicYear": "2025/2026",
            "startDate": "2026-01-05",
            "endDate": "2026-04-02"
        }),
    );
    let term_id = term
        .get("termId")
        .and_then(|v| v.as_str())
        .expect("termId")
        .to_string();

    request_ok(
        stdin,
        reader,
        "seed-student",
        "students.create",
        json!({
            "principal": admin(),
            "studentId": "S010",
            "name": "Bayo Ade",
            "classLevelId": class_level_id
        }),
    );

    (class_level_id, subject_id, term_id)
}

fn count_assessment_rows(workspace: &std::path::Path) -> i64 {
    let conn = rusqlite::Connection::open(workspace.join("gradebook.sqlite3"))
        .expect("open workspace db");
    conn.query_row("SELECT COUNT(*) FROM assessments", [], |r| r.get(0))
        .expect("count assessments")
}

#[test]
fn resubmitting_the_same_marks_keeps_one_row() {
    let workspace = temp_dir("gradebook-upsert-idempotent");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_class, subject_id, term_id) = seed_world(&mut stdin, &mut reader);

    for round in 0..2 {
        let result = request_ok(
            &mut stdin,
            &mut reader,
            &format!("submit-{}", round),
            "assessments.submitMark",
            json!({
                "principal": admin(),
                "studentId": "S010",
                "subjectId": subject_id,
                "termId": term_id,
                "caMark": 30.0,
                "examMark": 50.0
            }),
        );
        let row = result.get("assessment").expect("assessment row");
        assert_eq!(row.get("finalMark").and_then(|v| v.as_f64()), Some(80.0));
    }

    assert_eq!(count_assessment_rows(&workspace), 1);
}

#[test]
fn partial_update_preserves_the_other_component() {
    let workspace = temp_dir("gradebook-upsert-partial");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_class, subject_id, term_id) = seed_world(&mut stdin, &mut reader);

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assessments.submitMark",
        json!({
            "principal": admin(),
            "studentId": "S010",
            "subjectId": subject_id,
            "termId": term_id,
            "caMark": 28.0
        }),
    );

    // Only the exam arrives this time; the stored CA must survive.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assessments.submitMark",
        json!({
            "principal": admin(),
            "studentId": "S010",
            "subjectId": subject_id,
            "termId": term_id,
            "examMark": 55.0
        }),
    );
    let row = result.get("assessment").expect("assessment row");
    assert_eq!(row.get("caMark").and_then(|v| v.as_f64()), Some(28.0));
    assert_eq!(row.get("examMark").and_then(|v| v.as_f64()), Some(55.0));
    assert_eq!(row.get("finalMark").and_then(|v| v.as_f64()), Some(83.0));

    assert_eq!(count_assessment_rows(&workspace), 1);

    // Overwriting one component is last-writer-wins for that field only.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "assessments.submitMark",
        json!({
            "principal": admin(),
            "studentId": "S010",
            "subjectId": subject_id,
            "termId": term_id,
            "caMark": 35.0
        }),
    );
    let row = result.get("assessment").expect("assessment row");
    assert_eq!(row.get("caMark").and_then(|v| v.as_f64()), Some(35.0));
    assert_eq!(row.get("examMark").and_then(|v| v.as_f64()), Some(55.0));
    assert_eq!(row.get("finalMark").and_then(|v| v.as_f64()), Some(90.0));
}
