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

fn create_assessment(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
    kind: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        id,
        "assessments.create",
        json!({ "courseId": "MATH9", "name": name, "type": kind, "date": "2024-03-01" }),
    );
    assert_eq!(created["event"]["type"], "columnAdded");
    created["assessment"]["id"]
        .as_str()
        .expect("assessment id")
        .to_string()
}

fn average_of(table: &serde_json::Value, student_id: &str) -> String {
    let rows = table["rows"].as_array().expect("rows");
    let row = rows
        .iter()
        .find(|r| r[0] == student_id)
        .expect("student row");
    row[2].as_str().expect("average cell").to_string()
}

#[test]
fn weighted_average_follows_grade_changes() {
    let workspace = temp_dir("rollbook-gradebook-lifecycle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "courseId": "MATH9", "name": "Mathematics 9" }),
    );
    for (id, first, last) in [("L0001", "Ann", "Lee"), ("L0002", "Ben", "Ng")] {
        request_ok(
            &mut stdin,
            &mut reader,
            id,
            "students.create",
            json!({ "firstName": first, "lastName": last, "studentId": id }),
        );
    }
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.assignStudents",
        json!({ "courseId": "MATH9", "studentIds": ["L0001", "L0002"] }),
    );

    let quiz = create_assessment(&mut stdin, &mut reader, "4", "Quiz", "Test");
    let unit = create_assessment(&mut stdin, &mut reader, "5", "Unit Test", "Test");
    let exam = create_assessment(&mut stdin, &mut reader, "6", "Final", "Exam");
    assert!(quiz.starts_with('T') && unit.starts_with('T') && exam.starts_with('E'));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assessments.list",
        json!({ "courseId": "MATH9" }),
    );
    assert_eq!(listed["assessments"].as_array().map(|a| a.len()), Some(3));

    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "gradebook.recordGrades",
        json!({ "courseId": "MATH9", "assessmentId": quiz, "grades": { "L0001 - Ann Lee": 80 } }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "gradebook.recordGrades",
        json!({ "courseId": "MATH9", "assessmentId": unit, "grades": { "L0001": "60" } }),
    );
    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "gradebook.recordGrades",
        json!({ "courseId": "MATH9", "assessmentId": exam, "grades": { "L0001": 90, "L0002": "" } }),
    );
    assert_eq!(average_of(&graded["table"], "L0001"), "82.00");
    assert_eq!(average_of(&graded["table"], "L0002"), "0.00");

    let bad = request(
        &mut stdin,
        &mut reader,
        "11",
        "gradebook.recordGrades",
        json!({ "courseId": "MATH9", "assessmentId": exam, "grades": { "L0001": "abc" } }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "assessments.delete",
        json!({ "courseId": "MATH9", "assessmentId": exam }),
    );
    assert_eq!(removed["event"]["removed"], true);
    assert_eq!(average_of(&removed["table"], "L0001"), "28.00");

    let text = std::fs::read_to_string(workspace.join("grades/MATH9_gradebook.txt"))
        .expect("read gradebook file");
    assert!(!text.contains(&exam));
    assert!(text.lines().nth(1).unwrap_or("").contains(",28.00,"));

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn renamed_assessments_keep_their_grades() {
    let workspace = temp_dir("rollbook-gradebook-rename");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "courseId": "MATH9", "name": "Mathematics 9" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "firstName": "Ann", "lastName": "Lee", "studentId": "L0001" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.assignStudents",
        json!({ "courseId": "MATH9", "studentIds": ["L0001"] }),
    );
    let quiz = create_assessment(&mut stdin, &mut reader, "5", "Quiz", "Test");
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "gradebook.recordGrades",
        json!({ "courseId": "MATH9", "assessmentId": quiz, "grades": { "L0001": "75" } }),
    );

    let renamed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assessments.update",
        json!({ "assessmentId": quiz, "name": "Pop Quiz" }),
    );
    assert_eq!(renamed["event"]["type"], "columnRenamed");
    assert_eq!(renamed["event"]["to"], format!("{quiz} - Pop Quiz"));
    assert_eq!(renamed["assessment"]["date"], "2024-03-01");

    let grades = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "gradebook.grades",
        json!({ "courseId": "MATH9", "assessmentId": quiz }),
    );
    assert_eq!(grades["grades"], json!({ "L0001": "75" }));

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "gradebook.open",
        json!({ "courseId": "MATH9" }),
    );
    assert_eq!(
        opened["table"]["columns"],
        json!(["Student ID", "Student Name", "Average", format!("{quiz} - Pop Quiz")])
    );
    assert_eq!(average_of(&opened["table"], "L0001"), "30.00");

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "gradebook.save",
        json!({ "courseId": "MATH9", "rows": [["L0001", "Ann Lee", "1", "100"]] }),
    );
    assert_eq!(saved["event"]["type"], "tableReplaced");
    assert_eq!(average_of(&saved["table"], "L0001"), "40.00");

    let bad = request(
        &mut stdin,
        &mut reader,
        "11",
        "gradebook.save",
        json!({ "courseId": "MATH9", "rows": [["L0001", "Ann, Lee", "", "100"]] }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn failed_table_writes_keep_registry_rows() {
    let workspace = temp_dir("rollbook-gradebook-failed-write");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "courseId": "MATH9", "name": "Mathematics 9" }),
    );
    let quiz = create_assessment(&mut stdin, &mut reader, "3", "Quiz", "Test");

    // A directory where the temp file goes makes the gradebook save fail.
    let blocker = workspace.join("grades/MATH9_gradebook.txt.saving");
    std::fs::create_dir_all(&blocker).expect("create blocker");
    let failed = request(
        &mut stdin,
        &mut reader,
        "4",
        "assessments.delete",
        json!({ "courseId": "MATH9", "assessmentId": quiz }),
    );
    assert_eq!(error_code(&failed), "io_failed");
    let listed = request_ok(&mut stdin, &mut reader, "5", "assessments.list", json!({ "courseId": "MATH9" }));
    assert_eq!(listed["assessments"][0]["id"], quiz.as_str());

    std::fs::remove_dir_all(&blocker).expect("remove blocker");
    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assessments.delete",
        json!({ "courseId": "MATH9", "assessmentId": quiz }),
    );
    assert_eq!(removed["event"]["removed"], true);
    let listed = request_ok(&mut stdin, &mut reader, "7", "assessments.list", json!({ "courseId": "MATH9" }));
    assert_eq!(listed["assessments"], json!([]));

    // A directory in place of the gradebook cannot be removed as a file.
    let gradebook = workspace.join("grades/MATH9_gradebook.txt");
    std::fs::remove_file(&gradebook).expect("remove gradebook");
    std::fs::create_dir_all(gradebook.join("held")).expect("create gradebook dir");
    let failed = request(&mut stdin, &mut reader, "8", "courses.delete", json!({ "courseId": "MATH9" }));
    assert_eq!(error_code(&failed), "io_failed");
    let courses = request_ok(&mut stdin, &mut reader, "9", "courses.list", json!({}));
    assert_eq!(courses["courses"][0]["id"], "MATH9");

    std::fs::remove_dir_all(&gradebook).expect("remove gradebook dir");
    request_ok(&mut stdin, &mut reader, "10", "courses.delete", json!({ "courseId": "MATH9" }));
    let courses = request_ok(&mut stdin, &mut reader, "11", "courses.list", json!({}));
    assert_eq!(courses["courses"], json!([]));

    let _ = child.kill();
    let _ = child.wait();
}
