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

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().unwrap_or_else(|| json!({}))
}

fn admin() -> serde_json::Value {
    json!({ "id": 1, "role": "admin" })
}

fn teacher(id: i64) -> serde_json::Value {
    json!({ "id": id, "role": "user" })
}

fn create_term(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
    academic_year: &str,
) -> String {
    let term = request_ok(
        stdin,
        reader,
        id,
        "terms.create",
        json!({
            "principal": admin(),
            "name": name,
            "academicYear": academic_year,
            "startDate": "2025-09-01",
            "endDate": "2025-12-12"
        }),
    );
    term.get("termId")
        .and_then(|v| v.as_str())
        .expect("termId")
        .to_string()
}

#[test]
fn academic_year_must_be_consecutive() {
    let workspace = temp_dir("gradebook-terms-year");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    for (i, year) in ["2025/2027", "2025-2026", "25/26", "abcd/efgh"].iter().enumerate() {
        let error = request_err(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "terms.create",
            json!({
                "principal": admin(),
                "name": "First Term",
                "academicYear": year,
                "startDate": "2025-09-01",
                "endDate": "2025-12-12"
            }),
        );
        assert_eq!(
            error.get("code").and_then(|v| v.as_str()),
            Some("validation_failed"),
            "{} must be rejected",
            year
        );
    }

    create_term(&mut stdin, &mut reader, "good", "First Term", "2025/2026");
}

#[test]
fn duplicate_name_in_the_same_year_is_a_conflict() {
    let workspace = temp_dir("gradebook-terms-dup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    create_term(&mut stdin, &mut reader, "2", "First Term", "2025/2026");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "terms.create",
        json!({
            "principal": admin(),
            "name": "First Term",
            "academicYear": "2025/2026",
            "startDate": "2025-09-01",
            "endDate": "2025-12-12"
        }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("conflict"));
    let details = error.get("details").expect("conflict details");
    assert_eq!(
        details.get("name").and_then(|v| v.as_str()),
        Some("First Term")
    );
    assert_eq!(
        details.get("academicYear").and_then(|v| v.as_str()),
        Some("2025/2026")
    );

    // Same name in the following year is a different term.
    create_term(&mut stdin, &mut reader, "4", "First Term", "2026/2027");
}

#[test]
fn referenced_term_cannot_be_deleted() {
    let workspace = temp_dir("gradebook-terms-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classLevels.create",
        json!({ "principal": admin(), "name": "JSS 2" }),
    );
    let class_level_id = class
        .get("classLevelId")
        .and_then(|v| v.as_str())
        .expect("classLevelId")
        .to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "principal": admin(), "name": "History" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({
            "principal": admin(),
            "studentId": "S200",
            "name": "Ngozi Udo",
            "classLevelId": class_level_id
        }),
    );
    let term_id = create_term(&mut stdin, &mut reader, "5", "First Term", "2025/2026");

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assessments.submitMark",
        json!({
            "principal": admin(),
            "studentId": "S200",
            "subjectId": subject_id,
            "termId": term_id,
            "caMark": 15.0
        }),
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "terms.delete",
        json!({ "principal": admin(), "termId": term_id }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("conflict"));

    // An unreferenced term goes away cleanly.
    let empty_term = create_term(&mut stdin, &mut reader, "8", "Second Term", "2025/2026");
    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "terms.delete",
        json!({ "principal": admin(), "termId": empty_term }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "terms.list",
        json!({ "principal": admin() }),
    );
    let terms = listed.get("terms").and_then(|v| v.as_array()).expect("terms");
    assert_eq!(terms.len(), 1);
}

#[test]
fn term_mutation_is_admin_only() {
    let workspace = temp_dir("gradebook-terms-admin");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "terms.create",
        json!({
            "principal": teacher(7),
            "name": "First Term",
            "academicYear": "2025/2026",
            "startDate": "2025-09-01",
            "endDate": "2025-12-12"
        }),
    );
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("access_denied")
    );

    // Reading the term list stays open to any principal.
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "terms.list",
        json!({ "principal": teacher(7) }),
    );
}

#[test]
fn update_validates_the_merged_record() {
    let workspace = temp_dir("gradebook-terms-update");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let term_id = create_term(&mut stdin, &mut reader, "2", "First Term", "2025/2026");

    // Partial update touching only the year still re-validates the format.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "terms.update",
        json!({
            "principal": admin(),
            "termId": term_id,
            "academicYear": "2025/2030"
        }),
    );
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("validation_failed")
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "terms.update",
        json!({
            "principal": admin(),
            "termId": term_id,
            "name": "Renamed Term",
            "isActive": true
        }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "terms.list",
        json!({ "principal": admin() }),
    );
    let terms = listed.get("terms").and_then(|v| v.as_array()).expect("terms");
    assert_eq!(terms.len(), 1);
    assert_eq!(
        terms[0].get("name").and_then(|v| v.as_str()),
        Some("Renamed Term")
    );
    assert_eq!(terms[0].get("isActive").and_then(|v| v.as_bool()), Some(true));
}
