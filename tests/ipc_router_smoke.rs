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
    let exe = env!("CARGO_BIN_EXE_rollbookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollbookd");
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
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("rollbook-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "0", "health", json!({}));
    assert!(health["workspacePath"].is_null());
    let early = request(&mut stdin, &mut reader, "0b", "courses.list", json!({}));
    assert_eq!(error_code(&early), "no_workspace");

    request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "courseId": "SMOKE1", "name": "Smoke" }),
    );
    let dup = request(
        &mut stdin,
        &mut reader,
        "2b",
        "courses.create",
        json!({ "courseId": "SMOKE1", "name": "Smoke" }),
    );
    assert_eq!(error_code(&dup), "conflict");
    let bad_key = request(
        &mut stdin,
        &mut reader,
        "2c",
        "courses.create",
        json!({ "courseId": "../escape", "name": "Nope" }),
    );
    assert_eq!(error_code(&bad_key), "bad_params");

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "firstName": "Ann", "lastName": "Lee" }),
    );
    let student_id = student["studentId"].as_str().expect("student id").to_string();

    let mut statuses = serde_json::Map::new();
    statuses.insert(student_id.clone(), json!("Present"));

    let calls = vec![
        ("4", "courses.list", json!({})),
        ("5", "courses.assignStudents", json!({ "courseId": "SMOKE1", "studentIds": [student_id] })),
        ("6", "students.list", json!({})),
        ("7", "staff.create", json!({ "name": "Ms. Ray" })),
        ("8", "staff.list", json!({})),
        ("9", "ids.generate", json!({ "scope": "exam" })),
        ("10", "attendance.open", json!({ "courseId": "SMOKE1" })),
        ("11", "attendance.record", json!({ "courseId": "SMOKE1", "date": "2024-09-03", "statuses": statuses })),
        ("12", "attendance.deleteDate", json!({ "courseId": "SMOKE1", "date": "2024-09-03" })),
        ("13", "assessments.list", json!({ "courseId": "SMOKE1" })),
        ("14", "gradebook.open", json!({ "courseId": "SMOKE1" })),
        ("15", "reports.course", json!({ "courseId": "SMOKE1" })),
        ("16", "reports.courseSave", json!({ "courseId": "SMOKE1" })),
        ("17", "backup.exportWorkspaceBundle", json!({ "outPath": bundle_out.to_string_lossy() })),
        ("18", "backup.importWorkspaceBundle", json!({ "inPath": bundle_out.to_string_lossy() })),
        ("19", "courses.removeStudents", json!({ "courseId": "SMOKE1", "studentIds": [student_id] })),
    ];
    for (id, method, params) in calls {
        request_ok(&mut stdin, &mut reader, id, method, params);
    }

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "assessments.create",
        json!({ "courseId": "SMOKE1", "name": "Quiz", "type": "Test" }),
    );
    let assessment_id = created["assessment"]["id"].as_str().expect("assessment id").to_string();
    let calls = vec![
        ("21", "assessments.update", json!({ "assessmentId": assessment_id, "name": "Quiz 1" })),
        ("22", "gradebook.recordGrades", json!({ "courseId": "SMOKE1", "assessmentId": assessment_id, "grades": {} })),
        ("23", "gradebook.grades", json!({ "courseId": "SMOKE1", "assessmentId": assessment_id })),
        ("24", "gradebook.save", json!({ "courseId": "SMOKE1", "rows": [] })),
        ("25", "assessments.delete", json!({ "courseId": "SMOKE1", "assessmentId": assessment_id })),
        ("26", "courses.delete", json!({ "courseId": "SMOKE1" })),
    ];
    for (id, method, params) in calls {
        request_ok(&mut stdin, &mut reader, id, method, params);
    }
    assert!(!workspace.join("grades/SMOKE1_gradebook.txt").exists());
    assert!(!workspace.join("attendance/SMOKE1_attendance.txt").exists());

    let unknown = request(&mut stdin, &mut reader, "27", "grid.get", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    writeln!(stdin, "not json").expect("write junk");
    stdin.flush().expect("flush junk");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("bad_json is json");
    assert_eq!(value["error"]["code"], "bad_json");

    let _ = child.kill();
    let _ = child.wait();
}
